//! Correlation id propagation.

use super::{Handler, MessageContext, Middleware};
use tracing::Instrument;
use uuid::Uuid;

/// Binds the message's correlation id (or a fresh one) to the rest of the chain.
///
/// The id is stored on the [`MessageContext`] and recorded on a `message` span,
/// so every log line emitted further down carries it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationId;

impl Middleware for CorrelationId {
    fn name(&self) -> &'static str {
        "correlation_id"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |mut ctx: MessageContext| {
            let next = next.clone();
            async move {
                let correlation_id = ctx
                    .message
                    .correlation_id()
                    .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

                let span = tracing::info_span!("message", correlation_id = %correlation_id);
                ctx.set_correlation_id(correlation_id);

                next.call(ctx).instrument(span).await
            }
        })
    }
}
