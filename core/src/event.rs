//! Domain events and their envelope.
//!
//! Every event kind is a concrete struct holding an [`EventHeader`] and a typed
//! payload. The kind of an event is an explicit [`EventKind`] tag, and each kind
//! maps to exactly one topic. Nothing here relies on type names at runtime.
//!
//! # Payload Encoding
//!
//! Event payloads are JSON. Booking events flatten the ticket fields next to the
//! header, so a confirmed booking looks like:
//!
//! ```text
//! {
//!   "header": {"id": "...", "published_at": "...", "idempotency_key": "..."},
//!   "ticket_id": "T1",
//!   "status": "confirmed",
//!   "customer_email": "a@b.com",
//!   "price": {"amount": "10.00", "currency": "USD"}
//! }
//! ```
//!
//! This keeps `price.currency` addressable by the payload repair stage without
//! knowing which event kind it is looking at.

use crate::ticket::Ticket;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error types for event operations.
#[derive(Error, Debug, Clone)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Every event kind the system publishes.
///
/// The kind is the single source for topic names and for the `type` metadata tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A booking was confirmed.
    TicketBookingConfirmed,
    /// A booking was canceled.
    TicketBookingCanceled,
    /// A confirmation file was written for a ticket.
    TicketPrinted,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 3] = [
        Self::TicketBookingConfirmed,
        Self::TicketBookingCanceled,
        Self::TicketPrinted,
    ];

    /// Stable tag written into the `type` metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TicketBookingConfirmed => "TicketBookingConfirmed",
            Self::TicketBookingCanceled => "TicketBookingCanceled",
            Self::TicketPrinted => "TicketPrinted",
        }
    }

    /// Topic this kind is published to.
    #[must_use]
    pub const fn topic(self) -> &'static str {
        match self {
            Self::TicketBookingConfirmed => "TicketBookingConfirmed",
            Self::TicketBookingCanceled => "TicketBookingCanceled",
            Self::TicketPrinted => "TicketPrinted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

/// Header carried by every event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Unique per publish.
    pub id: String,
    /// Publish time.
    pub published_at: DateTime<Utc>,
    /// Identifies the logical operation; stable across redeliveries.
    pub idempotency_key: String,
}

impl EventHeader {
    /// Create a header with a fresh id.
    #[must_use]
    pub fn new(idempotency_key: impl Into<String>, published_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            published_at,
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// Generate an idempotency key for requests that did not supply one.
#[must_use]
pub fn generate_idempotency_key() -> String {
    format!("gen_{}", Uuid::new_v4())
}

/// A domain event with a fixed kind.
///
/// Implementors get JSON payload encoding for free.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Kind tag of this event type.
    const KIND: EventKind;

    /// The event header.
    fn header(&self) -> &EventHeader;

    /// Encode this event as a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if serde rejects the value.
    fn to_payload(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode an event from a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the payload does not match.
    fn from_payload(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A booking was confirmed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBookingConfirmed {
    /// Event header.
    pub header: EventHeader,
    /// Confirmed ticket.
    #[serde(flatten)]
    pub ticket: Ticket,
}

impl Event for TicketBookingConfirmed {
    const KIND: EventKind = EventKind::TicketBookingConfirmed;

    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// A booking was canceled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBookingCanceled {
    /// Event header.
    pub header: EventHeader,
    /// Canceled ticket.
    #[serde(flatten)]
    pub ticket: Ticket,
}

impl Event for TicketBookingCanceled {
    const KIND: EventKind = EventKind::TicketBookingCanceled;

    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// A confirmation file was written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPrinted {
    /// Header of the booking that caused this event.
    pub header: EventHeader,
    /// Printed ticket.
    pub ticket_id: String,
    /// Name of the written file.
    pub file_name: String,
}

impl Event for TicketPrinted {
    const KIND: EventKind = EventKind::TicketPrinted;

    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// What a successful publish produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Kind of the published event.
    pub kind: EventKind,
    /// Id of the transport message.
    pub message_uuid: String,
    /// Correlation id attached to the message.
    pub correlation_id: String,
    /// Header of the published event.
    pub header: EventHeader,
}

impl EventEnvelope {
    /// Topic the event was published to.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        self.kind.topic()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ticket::{Price, TicketStatus};

    fn confirmed() -> TicketBookingConfirmed {
        TicketBookingConfirmed {
            header: EventHeader::new("key-1", Utc::now()),
            ticket: Ticket {
                ticket_id: "T1".to_string(),
                status: TicketStatus::Confirmed,
                customer_email: "a@b.com".to_string(),
                price: Price {
                    amount: "10.00".to_string(),
                    currency: "USD".to_string(),
                },
            },
        }
    }

    #[test]
    fn every_kind_has_a_distinct_topic() {
        let mut topics: Vec<_> = EventKind::ALL.iter().map(|k| k.topic()).collect();
        topics.sort_unstable();
        topics.dedup();

        assert_eq!(topics.len(), EventKind::ALL.len());
    }

    #[test]
    fn kind_tag_parses_back() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!(matches!(
            "OrderPlaced".parse::<EventKind>(),
            Err(EventError::UnknownEventType(_))
        ));
    }

    #[test]
    fn booking_payload_is_flat_json() {
        let payload = confirmed().to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["ticket_id"], "T1");
        assert_eq!(value["price"]["currency"], "USD");
        assert_eq!(value["header"]["idempotency_key"], "key-1");
    }

    #[test]
    fn payload_of_other_kind_does_not_decode() {
        let payload = confirmed().to_payload().unwrap();

        assert!(TicketPrinted::from_payload(&payload).is_err());
    }

    #[test]
    fn generated_idempotency_keys_are_prefixed() {
        let key = generate_idempotency_key();

        assert!(key.starts_with("gen_"));
        assert_ne!(key, generate_idempotency_key());
    }
}
