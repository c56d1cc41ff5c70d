//! # Ticketflow Runtime
//!
//! Message-handling runtime for the ticketflow event pipeline.
//!
//! ## Core Components
//!
//! - **Middleware**: the fixed chain every delivery runs through
//!   (correlation, logging, retry, type filter, currency repair)
//! - **Router**: binds handlers to consumer groups and settles deliveries
//! - **Publisher**: turns typed events into tagged bus messages
//! - **Metrics**: Prometheus recorder and the pipeline's counters
//!
//! ## Example
//!
//! ```ignore
//! use ticketflow_runtime::{MiddlewareChain, RetryPolicy, Router};
//!
//! let mut router = Router::new(bus, MiddlewareChain::standard(RetryPolicy::default()));
//! router.add_handler::<TicketPrinted, _, _>("archive", |_ctx, event| async move {
//!     archive(event).await
//! })?;
//!
//! let running = router.run().await?;
//! running.shutdown(Duration::from_secs(10)).await;
//! ```

/// Prometheus metrics for observability
pub mod metrics;

/// Middleware stages and the chain that composes them
pub mod middleware;

/// Event publishing
pub mod publisher;

/// Retry logic with exponential backoff
pub mod retry;

/// Handler registry and consumption workers
pub mod router;

pub use middleware::{Handler, HandlerError, HandlerResult, MessageContext, Middleware, MiddlewareChain};
pub use publisher::{EventPublisher, PublishError};
pub use retry::RetryPolicy;
pub use router::{Router, RouterConfig, RouterError, RunningRouter, ShutdownReport};
