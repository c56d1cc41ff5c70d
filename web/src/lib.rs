//! Axum building blocks for ticketflow HTTP services.
//!
//! Services compose their own routers from these pieces:
//!
//! - [`correlation_id_layer`]: reads or generates the `Correlation-ID` header
//!   and opens a request span carrying it
//! - [`http_trace_layer`]: request/response tracing via `tower-http`
//! - [`CorrelationId`] and [`IdempotencyKey`]: header extractors
//! - [`AppError`]: JSON error responses
//! - [`handlers::health_check`]: `GET /health`
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::{get, post}};
//! use ticketflow_web::{correlation_id_layer, http_trace_layer, handlers::health_check};
//!
//! let app = Router::new()
//!     .route("/health", get(health_check))
//!     .route("/tickets-status", post(tickets_status))
//!     .layer(correlation_id_layer())
//!     .layer(http_trace_layer())
//!     .with_state(state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::{CorrelationId, IDEMPOTENCY_KEY_HEADER, IdempotencyKey};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer, http_trace_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
