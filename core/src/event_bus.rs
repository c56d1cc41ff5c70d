//! Event bus abstraction with consumer groups and explicit acknowledgement.
//!
//! This module provides the [`EventBus`] trait for publishing messages to topics
//! and consuming them through named consumer groups.
//!
//! # Architecture
//!
//! ```text
//!            publish(topic, message)
//!                     │
//!                     ▼
//!        ┌────────────────────────┐
//!        │  topic (append-only)   │
//!        └───┬────────────────┬───┘
//!            │                │
//!   group "svc.a"      group "svc.b"      ◄── independent cursors
//!            │                │
//!            ▼                ▼
//!       Delivery ──ack──► cursor advances
//!                ──nack─► redelivered to the same group
//! ```
//!
//! # Key Principles
//!
//! - **Durable topics**: a group that subscribes late still sees earlier messages
//!   (subject to the transport's retention and offset-reset policy)
//! - **Group isolation**: every group sees every message; redelivery stays inside one group
//! - **At-least-once delivery**: a message is delivered until it is acked
//! - **Idempotency**: consumers must tolerate duplicates
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `ticketflow-testing` (tests)
//! - `RedpandaEventBus` in `ticketflow-redpanda` (Kafka-compatible, production)

use crate::message::Message;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe a consumer group to a topic
    #[error("Subscription failed for topic '{topic}' (group '{consumer_group}'): {reason}")]
    SubscriptionFailed {
        /// The topic
        topic: String,
        /// The consumer group
        consumer_group: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to decode a delivered message
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Failed to ack or nack a delivery
    #[error("Acknowledgement failed: {0}")]
    AcknowledgementFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Where a message stands for one consumer group.
///
/// `Pending → InFlight → {Acked | RedeliveryPending}`, and
/// `RedeliveryPending → InFlight` on the next delivery. There is no automatic
/// terminal failure state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Not yet delivered to the group.
    Pending,
    /// Delivered, awaiting ack or nack.
    InFlight,
    /// Processed; never delivered to this group again.
    Acked,
    /// Rejected; will be delivered to the group again.
    RedeliveryPending,
}

/// Boxed future returned by bus operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Settles a single delivery.
///
/// Exactly one of [`ack`](Acknowledger::ack) or [`nack`](Acknowledger::nack) is
/// called per delivery. Implementations must treat a dropped acknowledger as a nack.
pub trait Acknowledger: Send {
    /// Mark the message as processed for this consumer group.
    fn ack(self: Box<Self>) -> BusFuture<'static, ()>;

    /// Request redelivery of the message to this consumer group.
    fn nack(self: Box<Self>) -> BusFuture<'static, ()>;
}

/// A message handed to one consumer group, awaiting settlement.
pub struct Delivery {
    message: Message,
    acknowledger: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Pair a message with the acknowledger that settles it.
    #[must_use]
    pub fn new(message: Message, acknowledger: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            acknowledger,
        }
    }

    /// The delivered message.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Split into the message and its acknowledger.
    #[must_use]
    pub fn into_parts(self) -> (Message, Box<dyn Acknowledger>) {
        (self.message, self.acknowledger)
    }

    /// Acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::AcknowledgementFailed`] if the transport rejects the ack.
    pub async fn ack(self) -> Result<(), EventBusError> {
        self.acknowledger.ack().await
    }

    /// Reject the delivery so that it is redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::AcknowledgementFailed`] if the transport rejects the nack.
    pub async fn nack(self) -> Result<(), EventBusError> {
        self.acknowledger.nack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries for one (topic, consumer group) subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the publish path is shared by the
/// intake API and by every handler that re-publishes derived events.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the bus can be
/// held as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Append a message to a topic.
    ///
    /// The message becomes visible to every current and future consumer group
    /// on the topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the message could not be appended.
    fn publish(&self, topic: &str, message: &Message) -> BusFuture<'_, ()>;

    /// Subscribe a consumer group to a topic.
    ///
    /// Several subscriptions with the same group share the group's cursor (each
    /// message goes to one of them); different groups never affect each other.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot be created.
    fn subscribe(&self, topic: &str, consumer_group: &str) -> BusFuture<'_, DeliveryStream>;
}
