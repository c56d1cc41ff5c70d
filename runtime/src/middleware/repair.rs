//! Repair of known-bad payloads.
//!
//! Some upstream producers send bookings with an empty currency. The currency
//! is always USD in that case, so it is filled in here instead of in every
//! handler.

use super::{Handler, MessageContext, Middleware};
use serde_json::Value;
use ticketflow_core::ticket::DEFAULT_CURRENCY;

/// Fills an empty or missing `price.currency` with a default.
///
/// Payloads that are not JSON objects, or have no `price` object, pass through
/// unchanged; decoding them is the handler's business.
#[derive(Debug, Clone)]
pub struct CurrencyRepair {
    default_currency: String,
}

impl CurrencyRepair {
    /// Repair with a custom default currency.
    #[must_use]
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            default_currency: default_currency.into(),
        }
    }
}

impl Default for CurrencyRepair {
    fn default() -> Self {
        Self::new(DEFAULT_CURRENCY)
    }
}

impl Middleware for CurrencyRepair {
    fn name(&self) -> &'static str {
        "currency_repair"
    }

    fn wrap(&self, next: Handler) -> Handler {
        let default_currency = self.default_currency.clone();
        Handler::new(move |mut ctx: MessageContext| {
            if let Some(repaired) = repair_currency(&ctx.message.payload, &default_currency) {
                tracing::debug!(
                    message_uuid = %ctx.message.uuid,
                    currency = %default_currency,
                    "Filled missing price currency"
                );
                ctx.message.payload = repaired;
            }
            next.call(ctx)
        })
    }
}

/// Returns the rewritten payload, or `None` when nothing needs repair.
fn repair_currency(payload: &[u8], default_currency: &str) -> Option<Vec<u8>> {
    let mut value: Value = serde_json::from_slice(payload).ok()?;
    let price = value.get_mut("price")?.as_object_mut()?;

    let missing = price
        .get("currency")
        .and_then(Value::as_str)
        .is_none_or(str::is_empty);
    if !missing {
        return None;
    }

    price.insert("currency".to_string(), Value::String(default_currency.to_string()));
    serde_json::to_vec(&value).ok()
}
