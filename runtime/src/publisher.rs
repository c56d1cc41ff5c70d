//! Publishing domain events onto the bus.
//!
//! [`EventPublisher`] turns a typed event into a transport [`Message`]: it encodes
//! the payload, tags the message with the event kind and a correlation id, and
//! appends it to the kind's topic. It does not retry; a failed publish is
//! returned to the caller.

use crate::metrics::PublishMetrics;
use std::sync::Arc;
use thiserror::Error;
use ticketflow_core::environment::Clock;
use ticketflow_core::event::{Event, EventEnvelope, EventError, EventHeader, generate_idempotency_key};
use ticketflow_core::event_bus::{EventBus, EventBusError};
use ticketflow_core::message::{CORRELATION_ID_KEY, Message, TYPE_KEY};
use uuid::Uuid;

/// Errors returned by [`EventPublisher::publish`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// The event could not be encoded.
    #[error("Failed to encode event: {0}")]
    Serialization(#[from] EventError),

    /// The bus rejected the message.
    #[error(transparent)]
    Transport(#[from] EventBusError),
}

/// Publishes typed events to their topics.
///
/// Cheap to clone; clones share the bus and clock.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl EventPublisher {
    /// Create a publisher over a bus.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self { bus, clock }
    }

    /// A fresh header: new id, current time, and the given idempotency key
    /// (or a generated `gen_` key).
    #[must_use]
    pub fn new_header(&self, idempotency_key: Option<&str>) -> EventHeader {
        let key = idempotency_key
            .filter(|key| !key.is_empty())
            .map_or_else(generate_idempotency_key, ToString::to_string);
        EventHeader::new(key, self.clock.now())
    }

    /// Publish an event to the topic of its kind.
    ///
    /// A missing correlation id is generated.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Serialization`] if the event cannot be encoded and
    /// [`PublishError::Transport`] if the bus rejects the message.
    pub async fn publish<E: Event>(
        &self,
        event: &E,
        correlation_id: Option<&str>,
    ) -> Result<EventEnvelope, PublishError> {
        let kind = E::KIND;
        let correlation_id = correlation_id
            .filter(|id| !id.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

        let message = Message::new(event.to_payload()?)
            .with_metadata(CORRELATION_ID_KEY, correlation_id.clone())
            .with_metadata(TYPE_KEY, kind.as_str());

        if let Err(error) = self.bus.publish(kind.topic(), &message).await {
            PublishMetrics::record_error(kind.as_str());
            tracing::error!(
                topic = kind.topic(),
                message_uuid = %message.uuid,
                error = %error,
                "Failed to publish event"
            );
            return Err(error.into());
        }

        PublishMetrics::record_publish(kind.as_str());
        tracing::debug!(
            topic = kind.topic(),
            message_uuid = %message.uuid,
            event_id = %event.header().id,
            correlation_id = %correlation_id,
            "Event published"
        );

        Ok(EventEnvelope {
            kind,
            message_uuid: message.uuid,
            correlation_id,
            header: event.header().clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ticketflow_core::event::{EventKind, TicketBookingCanceled, TicketPrinted};
    use ticketflow_core::event_bus::{BusFuture, DeliveryStream};
    use ticketflow_core::ticket::{Price, Ticket, TicketStatus};
    use ticketflow_testing::{InMemoryEventBus, test_clock};

    struct UnreachableBus;

    impl EventBus for UnreachableBus {
        fn publish(&self, topic: &str, _message: &Message) -> BusFuture<'_, ()> {
            let topic = topic.to_string();
            Box::pin(async move {
                Err(EventBusError::PublishFailed {
                    topic,
                    reason: "broker down".to_string(),
                })
            })
        }

        fn subscribe(&self, topic: &str, consumer_group: &str) -> BusFuture<'_, DeliveryStream> {
            let (topic, consumer_group) = (topic.to_string(), consumer_group.to_string());
            Box::pin(async move {
                Err(EventBusError::SubscriptionFailed {
                    topic,
                    consumer_group,
                    reason: "broker down".to_string(),
                })
            })
        }
    }

    fn canceled(publisher: &EventPublisher) -> TicketBookingCanceled {
        TicketBookingCanceled {
            header: publisher.new_header(Some("key-1")),
            ticket: Ticket {
                ticket_id: "T9".to_string(),
                status: TicketStatus::Canceled,
                customer_email: "c@d.com".to_string(),
                price: Price {
                    amount: "3.50".to_string(),
                    currency: "EUR".to_string(),
                },
            },
        }
    }

    #[tokio::test]
    async fn publishes_to_kind_topic_with_tags() {
        let bus = Arc::new(InMemoryEventBus::new());
        let publisher = EventPublisher::new(bus.clone(), Arc::new(test_clock()));
        let event = canceled(&publisher);

        let envelope = publisher.publish(&event, Some("corr-1")).await.unwrap();

        assert_eq!(envelope.topic(), "TicketBookingCanceled");
        assert_eq!(envelope.correlation_id, "corr-1");
        assert_eq!(envelope.header.idempotency_key, "key-1");

        let published = bus.published("TicketBookingCanceled");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].uuid, envelope.message_uuid);
        assert_eq!(published[0].message_type(), Some("TicketBookingCanceled"));
        assert_eq!(published[0].correlation_id(), Some("corr-1"));
        assert_eq!(TicketBookingCanceled::from_payload(&published[0].payload).unwrap(), event);
    }

    #[tokio::test]
    async fn generates_missing_ids() {
        let bus = Arc::new(InMemoryEventBus::new());
        let publisher = EventPublisher::new(bus.clone(), Arc::new(test_clock()));
        let header = publisher.new_header(None);
        let event = TicketPrinted {
            header: header.clone(),
            ticket_id: "T1".to_string(),
            file_name: "T1-ticket.html".to_string(),
        };

        let envelope = publisher.publish(&event, None).await.unwrap();

        assert!(header.idempotency_key.starts_with("gen_"));
        assert_eq!(header.published_at, test_clock().now());
        assert!(Uuid::parse_str(&envelope.correlation_id).is_ok());
        assert_eq!(envelope.kind, EventKind::TicketPrinted);
    }

    #[tokio::test]
    async fn each_publish_gets_a_new_message_id() {
        let bus = Arc::new(InMemoryEventBus::new());
        let publisher = EventPublisher::new(bus.clone(), Arc::new(test_clock()));
        let event = canceled(&publisher);

        let first = publisher.publish(&event, None).await.unwrap();
        let second = publisher.publish(&event, None).await.unwrap();

        assert_ne!(first.message_uuid, second.message_uuid);
        assert_eq!(first.header.idempotency_key, second.header.idempotency_key);
    }

    #[tokio::test]
    async fn transport_failure_is_returned_not_retried() {
        let publisher = EventPublisher::new(Arc::new(UnreachableBus), Arc::new(test_clock()));
        let event = canceled(&publisher);

        let result = publisher.publish(&event, None).await;

        assert!(matches!(
            result,
            Err(PublishError::Transport(EventBusError::PublishFailed { .. }))
        ));
    }
}
