//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's correlation ID
//! - [`IdempotencyKey`]: the optional `Idempotency-Key` header
//!
//! # Examples
//!
//! ```ignore
//! use ticketflow_web::extractors::{CorrelationId, IdempotencyKey};
//!
//! async fn handler(
//!     correlation_id: CorrelationId,
//!     idempotency_key: IdempotencyKey,
//! ) -> StatusCode {
//!     tracing::info!(correlation_id = %correlation_id.0, "Processing request");
//!     StatusCode::OK
//! }
//! ```

use crate::middleware::CORRELATION_ID_HEADER;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Header carrying the caller's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Correlation ID for request tracing.
///
/// Taken from the value stored by the correlation layer, then from the
/// `Correlation-ID` header, and generated as a UUID v4 otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let correlation_id = header_value(parts, CORRELATION_ID_HEADER)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self(correlation_id))
    }
}

/// Caller-supplied idempotency key, if any.
///
/// Missing or blank headers yield `IdempotencyKey(None)`; generating a key is
/// left to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(header_value(parts, IDEMPOTENCY_KEY_HEADER)))
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}
