//! Middleware chain applied to every delivered message.
//!
//! A [`Handler`] is an async function from a [`MessageContext`] to a
//! [`HandlerResult`]. A [`Middleware`] turns one handler into another
//! (`next -> handler`). A [`MiddlewareChain`] is an ordered list of stages; the
//! first stage is the outermost wrapper.
//!
//! # Standard Order
//!
//! ```text
//! correlation ─► logging ─► retry ─► type filter ─► currency repair ─► handler
//! ```
//!
//! Correlation and logging wrap retry, so every attempt runs inside the same
//! correlation span and a terminal failure is logged once. The type filter and
//! the repair stage sit inside retry and in front of business logic.

mod correlation;
mod logging;
mod repair;
mod retry;
mod type_filter;

pub use correlation::CorrelationId;
pub use logging::Logging;
pub use repair::CurrencyRepair;
pub use retry::Retry;
pub use type_filter::{MalformedMessageError, TypeFilter};

use crate::publisher::PublishError;
use crate::retry::RetryPolicy;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use ticketflow_core::event::EventError;
use ticketflow_core::message::Message;
use ticketflow_core::repository::StorageError;
use tokio::sync::watch;

/// Failure of a handler invocation.
///
/// Every variant is retried by the [`Retry`] stage and, once retries are used
/// up, causes the delivery to be nacked.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Payload does not decode into the expected event.
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] EventError),

    /// Payload decoded but holds an unusable value.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Ticket storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Re-publishing a derived event failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// A downstream collaborator (receipts, spreadsheets, files) failed.
    #[error("Collaborator call failed: {0}")]
    Collaborator(String),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of a handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Per-message state threaded through the chain.
///
/// Each retry attempt receives its own clone, so stages may modify the message
/// freely.
#[derive(Clone, Debug)]
pub struct MessageContext {
    /// The delivered message.
    pub message: Message,
    correlation_id: Option<String>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl MessageContext {
    /// Wrap a delivered message.
    #[must_use]
    pub const fn new(message: Message) -> Self {
        Self {
            message,
            correlation_id: None,
            shutdown: None,
        }
    }

    /// Attach the router's shutdown signal.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Whether the router has been told to stop. Always `false` outside a router.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Correlation id bound by the correlation stage, falling back to metadata.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id
            .as_deref()
            .or_else(|| self.message.correlation_id())
    }

    /// Bind a correlation id for the rest of the chain.
    pub fn set_correlation_id(&mut self, correlation_id: impl Into<String>) {
        self.correlation_id = Some(correlation_id.into());
    }
}

type HandlerFn = dyn Fn(MessageContext) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// A cloneable async message handler.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    /// Create a handler from an async function.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx| -> BoxFuture<'static, HandlerResult> { Box::pin(f(ctx)) }),
        }
    }

    /// Invoke the handler.
    pub fn call(&self, ctx: MessageContext) -> BoxFuture<'static, HandlerResult> {
        (self.inner)(ctx)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(<fn>)")
    }
}

/// A stage of the chain: wraps the next handler into a new one.
pub trait Middleware: Send + Sync {
    /// Stage name, used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Wrap `next`.
    fn wrap(&self, next: Handler) -> Handler;
}

/// Ordered list of middleware stages.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// An empty chain (handlers run unwrapped).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The five standard stages in their fixed order.
    #[must_use]
    pub fn standard(policy: RetryPolicy) -> Self {
        Self::new()
            .with(CorrelationId)
            .with(Logging)
            .with(Retry::new(policy))
            .with(TypeFilter)
            .with(CurrencyRepair::default())
    }

    /// Append an inner stage.
    #[must_use]
    pub fn with(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Stage names, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Wrap `handler` in every stage, folding from the innermost stage outwards.
    #[must_use]
    pub fn apply(&self, handler: Handler) -> Handler {
        self.stages
            .iter()
            .rev()
            .fold(handler, |next, stage| stage.wrap(next))
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}
