//! # Ticketflow Core
//!
//! Core types and traits for the ticketflow event pipeline.
//!
//! Booking events enter through an HTTP intake, get published to one topic per
//! event kind, and are consumed by independent handlers, each through its own
//! consumer group. This crate holds the vocabulary shared by every other crate:
//!
//! - [`message`]: the transport message (uuid, metadata, payload bytes)
//! - [`event`]: event kinds, topics, headers, and the concrete event types
//! - [`event_bus`]: the publish/subscribe contract with ack/nack
//! - [`ticket`]: the ticket model and the persisted record
//! - [`repository`]: the idempotent ticket storage contract
//! - [`environment`]: injectable dependencies such as the clock
//!
//! ## Delivery Model
//!
//! Delivery is at-least-once. Handlers and storage are written to tolerate
//! duplicates instead of relying on exactly-once transport semantics.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod event;
pub mod event_bus;
pub mod message;
pub mod repository;
pub mod ticket;

/// Environment module - injectable dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();

        assert!(second >= first);
    }
}
