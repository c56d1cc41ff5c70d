//! Drops messages that carry no event-kind tag.

use super::{Handler, MessageContext, Middleware};
use crate::metrics::MiddlewareMetrics;
use thiserror::Error;

/// A delivered message without a `type` tag.
///
/// Such messages are dropped: handling succeeds without reaching the handler,
/// so they are acked and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("message {message_uuid} has no type tag")]
pub struct MalformedMessageError {
    /// Id of the dropped message.
    pub message_uuid: String,
}

/// Skips messages whose `type` metadata is missing or empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeFilter;

impl Middleware for TypeFilter {
    fn name(&self) -> &'static str {
        "type_filter"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |ctx: MessageContext| {
            let next = next.clone();
            async move {
                if ctx.message.message_type().is_none() {
                    let error = MalformedMessageError {
                        message_uuid: ctx.message.uuid.clone(),
                    };
                    tracing::error!(
                        message_uuid = %error.message_uuid,
                        error = %error,
                        "skipping message due to missing message type"
                    );
                    MiddlewareMetrics::record_dropped();
                    return Ok(());
                }

                next.call(ctx).await
            }
        })
    }
}
