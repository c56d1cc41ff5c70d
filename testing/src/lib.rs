//! # Ticketflow Testing
//!
//! Testing utilities for ticketflow services.
//!
//! This crate provides:
//! - An in-memory event bus with consumer groups, acks and redelivery
//! - In-memory ticket storage with failure injection
//! - A fixed clock
//! - Polling helpers and proptest strategies for tickets
//!
//! ## Example
//!
//! ```ignore
//! use ticketflow_testing::{InMemoryEventBus, wait_until};
//!
//! #[tokio::test]
//! async fn handler_acks_message() {
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     let running = build_router(bus.clone()).run().await?;
//!
//!     bus.publish("TicketPrinted", &message).await?;
//!     wait_until(Duration::from_secs(5), || bus.acked_count("TicketPrinted", "svc.archive") == 1)
//!         .await
//!         .unwrap();
//! }
//! ```

use chrono::{DateTime, Utc};
use ticketflow_core::environment::Clock;

/// In-memory event bus
pub mod event_bus;

/// In-memory ticket storage
pub mod repository;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticketflow_testing::mocks::FixedClock;
    /// use ticketflow_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use std::time::Duration;
    use thiserror::Error;

    /// Returned by [`wait_until`] when the condition never held.
    #[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
    #[error("condition not met within {0:?}")]
    pub struct WaitTimedOut(pub Duration);

    /// Poll `condition` every few milliseconds until it holds or `timeout` passes.
    ///
    /// Asynchronous consumers settle messages in the background; tests use this
    /// instead of fixed sleeps.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimedOut`] if the condition is still false at the deadline.
    pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> Result<(), WaitTimedOut>
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WaitTimedOut(timeout));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use ticketflow_core::ticket::{Price, Ticket, TicketStatus};

    /// Ticket ids like `T1`..`T9999`.
    pub fn ticket_id() -> impl Strategy<Value = String> {
        (1_u32..10_000).prop_map(|n| format!("T{n}"))
    }

    /// Prices with two-decimal amounts; the currency is sometimes missing.
    pub fn price() -> impl Strategy<Value = Price> {
        (
            0_u32..100_000,
            prop_oneof![Just(""), Just("USD"), Just("EUR"), Just("GBP")],
        )
            .prop_map(|(cents, currency)| Price {
                amount: format!("{}.{:02}", cents / 100, cents % 100),
                currency: currency.to_string(),
            })
    }

    /// Tickets with the given status.
    pub fn ticket(status: TicketStatus) -> impl Strategy<Value = Ticket> {
        (ticket_id(), "[a-z]{1,8}@[a-z]{1,8}\\.com", price()).prop_map(
            move |(ticket_id, customer_email, price)| Ticket {
                ticket_id,
                status,
                customer_email,
                price,
            },
        )
    }
}

pub use event_bus::InMemoryEventBus;
pub use helpers::{WaitTimedOut, wait_until};
pub use mocks::{FixedClock, test_clock};
pub use repository::InMemoryTicketRepository;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[tokio::test]
    async fn wait_until_reports_timeout() {
        let result = wait_until(Duration::from_millis(20), || false).await;
        assert_eq!(result, Err(WaitTimedOut(Duration::from_millis(20))));
        assert_eq!(
            result.unwrap_err().to_string(),
            "condition not met within 20ms"
        );
    }
}
