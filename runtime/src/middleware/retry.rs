//! Retry stage.

use super::{Handler, MessageContext, Middleware};
use crate::metrics::MiddlewareMetrics;
use crate::retry::{RetryPolicy, retry_while};

/// Re-runs the inner chain on failure with exponential backoff.
///
/// Each attempt gets a fresh clone of the context, so the stages inside see
/// the message exactly as delivered. Once the router is shutting down no new
/// attempt starts and the last error is returned.
#[derive(Debug, Clone)]
pub struct Retry {
    policy: RetryPolicy,
}

impl Retry {
    /// Create the stage with the given policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The configured policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Middleware for Retry {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn wrap(&self, next: Handler) -> Handler {
        let policy = self.policy.clone();
        Handler::new(move |ctx: MessageContext| {
            let next = next.clone();
            let policy = policy.clone();
            async move {
                let mut attempt = 0_u64;
                retry_while(
                    &policy,
                    || !ctx.is_shutting_down(),
                    || {
                        attempt += 1;
                        if attempt > 1 {
                            MiddlewareMetrics::record_retry();
                        }
                        next.call(ctx.clone())
                    },
                )
                .await
            }
        })
    }
}
