//! Structured logging around each message.

use super::{Handler, MessageContext, Middleware};

/// Logs before handling and once more if handling fails.
///
/// Placed outside the retry stage, it logs one "Handling a message" line per
/// delivery and at most one "Message handling error" line per delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logging;

impl Middleware for Logging {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |ctx: MessageContext| {
            let next = next.clone();
            async move {
                let message_uuid = ctx.message.uuid.clone();
                tracing::info!(message_uuid = %message_uuid, "Handling a message");

                let result = next.call(ctx).await;
                if let Err(error) = &result {
                    tracing::error!(message_uuid = %message_uuid, error = %error, "Message handling error");
                }
                result
            }
        })
    }
}
