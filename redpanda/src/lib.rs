//! Redpanda event bus for ticketflow.
//!
//! This crate implements the [`EventBus`] trait from `ticketflow-core` on top of
//! rdkafka, so it works with Redpanda or any other Kafka-compatible broker.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits, one consumer per
//! (topic, consumer group) subscription:
//!
//! ```text
//!  broker ──recv──► Delivery ──► router
//!                       │
//!            ack ◄──────┤ commit offset + 1
//!            nack/drop ◄┘ seek back to the same offset (redelivered next)
//! ```
//!
//! - The consumer waits for each delivery to be settled before reading the next
//!   one, so a nacked message is redelivered before anything after it
//! - Nothing is committed for a message that was not acked; a crash means redelivery
//! - Consumers MUST be idempotent
//!
//! Messages are bincode-encoded [`Message`]s, keyed by their type tag.
//!
//! # Example
//!
//! ```no_run
//! use ticketflow_redpanda::RedpandaEventBus;
//! use ticketflow_core::event_bus::EventBus;
//! use ticketflow_core::message::Message;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:9092")?;
//!
//! event_bus.publish("TicketPrinted", &Message::new(b"{}".to_vec())).await?;
//!
//! let mut stream = event_bus.subscribe("TicketPrinted", "svc-tickets.archive").await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     println!("Received: {}", delivery.message());
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use futures::future;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use ticketflow_core::event_bus::{
    Acknowledger, BusFuture, Delivery, DeliveryStream, EventBus, EventBusError,
};
use ticketflow_core::message::Message;
use tokio::sync::{mpsc, oneshot};

/// Redpanda event bus implementation.
///
/// Publishing goes through one shared producer. Every subscription creates its
/// own consumer with `group.id` set to the consumer group, so groups keep
/// independent committed offsets.
///
/// # Example
///
/// ```no_run
/// use ticketflow_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .auto_offset_reset("earliest")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    /// Kafka producer for publishing messages
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Auto offset reset policy for new groups
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Offset reset policy applied to consumer groups without a committed offset.
    #[must_use]
    pub fn auto_offset_reset(&self) -> &str {
        &self.auto_offset_reset
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated, e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where consumer groups without a committed offset start reading:
    /// `"earliest"` (whole topic) or `"latest"` (new messages only).
    ///
    /// Default: `"earliest"`, so a group added later still sees earlier messages.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created successfully"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            auto_offset_reset,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Ack,
    Nack,
}

/// Reports the outcome back to the consumer task. Dropping it without a call
/// closes the channel, which the consumer task treats as a nack.
struct RedpandaAcknowledger {
    outcome: oneshot::Sender<Outcome>,
}

impl RedpandaAcknowledger {
    fn send(self, outcome: Outcome) -> BusFuture<'static, ()> {
        let result = self.outcome.send(outcome).map_err(|_| {
            EventBusError::AcknowledgementFailed("consumer task is gone".to_string())
        });
        Box::pin(future::ready(result))
    }
}

impl Acknowledger for RedpandaAcknowledger {
    fn ack(self: Box<Self>) -> BusFuture<'static, ()> {
        self.send(Outcome::Ack)
    }

    fn nack(self: Box<Self>) -> BusFuture<'static, ()> {
        self.send(Outcome::Nack)
    }
}

fn subscription_error(topic: &str, consumer_group: &str, reason: String) -> EventBusError {
    EventBusError::SubscriptionFailed {
        topic: topic.to_string(),
        consumer_group: consumer_group.to_string(),
        reason,
    }
}

/// Owns one consumer and feeds deliveries to the subscriber one at a time.
async fn consume(
    consumer: StreamConsumer,
    topic: String,
    consumer_group: String,
    tx: mpsc::Sender<Result<Delivery, EventBusError>>,
) {
    loop {
        let received = tokio::select! {
            () = tx.closed() => break,
            received = consumer.recv() => received,
        };

        let (partition, offset, decoded) = match received {
            Ok(record) => (
                record.partition(),
                record.offset(),
                record.payload().map(Message::from_bytes),
            ),
            Err(e) => {
                let err = EventBusError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let message = match decoded {
            Some(Ok(message)) => message,
            undecodable => {
                // Nothing can ever decode this record; skip it for the group
                let reason = match undecodable {
                    Some(Err(e)) => e.to_string(),
                    _ => "Message has no payload".to_string(),
                };
                tracing::warn!(
                    topic = %topic,
                    partition,
                    offset,
                    reason = %reason,
                    "Skipping undecodable record"
                );
                commit(&consumer, &topic, partition, offset);
                if tx
                    .send(Err(EventBusError::DeserializationFailed(reason)))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        tracing::trace!(
            topic = %topic,
            partition,
            offset,
            message_uuid = %message.uuid,
            "Received message"
        );

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let delivery = Delivery::new(
            message,
            Box::new(RedpandaAcknowledger {
                outcome: outcome_tx,
            }),
        );
        if tx.send(Ok(delivery)).await.is_err() {
            tracing::debug!("Subscriber dropped, exiting consumer task");
            break;
        }

        match outcome_rx.await {
            Ok(Outcome::Ack) => commit(&consumer, &topic, partition, offset),
            Ok(Outcome::Nack) | Err(_) => {
                if let Err(e) = consumer.seek(&topic, partition, Offset::Offset(offset), Timeout::After(Duration::from_secs(5))) {
                    tracing::error!(
                        topic = %topic,
                        partition,
                        offset,
                        error = %e,
                        "Failed to rewind after nack (redelivery deferred to next rebalance)"
                    );
                }
            }
        }
    }

    tracing::debug!(topic = %topic, consumer_group = %consumer_group, "Consumer task exiting");
}

fn commit(consumer: &StreamConsumer, topic: &str, partition: i32, offset: i64) {
    let mut offsets = TopicPartitionList::new();
    let committed = offsets
        .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
        .and_then(|()| consumer.commit(&offsets, CommitMode::Async));

    if let Err(e) = committed {
        tracing::warn!(
            topic = %topic,
            partition,
            offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(&self, topic: &str, message: &Message) -> BusFuture<'_, ()> {
        let topic = topic.to_string();
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = message.to_bytes().map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

            // Same type tag, same partition: preserves per-kind ordering
            let key = message.message_type().unwrap_or(message.uuid.as_str()).to_string();
            let record = FutureRecord::to(&topic).payload(&payload).key(key.as_str());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        message_uuid = %message.uuid,
                        "Message published successfully"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(&self, topic: &str, consumer_group: &str) -> BusFuture<'_, DeliveryStream> {
        let topic = topic.to_string();
        let consumer_group = consumer_group.to_string();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| {
                    subscription_error(&topic, &consumer_group, format!("Failed to create consumer: {e}"))
                })?;

            consumer.subscribe(&[topic.as_str()]).map_err(|e| {
                subscription_error(&topic, &consumer_group, format!("Failed to subscribe: {e}"))
            })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %consumer_group,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(consume(consumer, topic, consumer_group, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = RedpandaEventBus::builder().build();

        assert!(matches!(result, Err(EventBusError::ConnectionFailed(_))));
    }

    #[test]
    fn builder_defaults_to_earliest_offsets() {
        // Creating a producer does not contact the broker
        let Ok(bus) = RedpandaEventBus::new("localhost:9092") else {
            return;
        };

        assert_eq!(bus.brokers(), "localhost:9092");
        assert_eq!(bus.auto_offset_reset(), "earliest");
    }

    #[tokio::test]
    async fn dropped_acknowledger_reads_as_nack() {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        drop(RedpandaAcknowledger {
            outcome: outcome_tx,
        });

        assert!(outcome_rx.await.is_err());
    }

    #[tokio::test]
    async fn acknowledger_reports_outcome() {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let acknowledger: Box<dyn Acknowledger> = Box::new(RedpandaAcknowledger {
            outcome: outcome_tx,
        });

        acknowledger.nack().await.ok();

        assert_eq!(outcome_rx.await.ok(), Some(Outcome::Nack));
    }
}
