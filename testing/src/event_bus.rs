//! In-memory event bus with consumer groups and redelivery.
//!
//! Topics are append-only logs. Each (topic, consumer group) pair keeps its own
//! cursor plus a queue of nacked offsets, so groups never see each other's
//! acks or redeliveries. A group subscribing late starts from the beginning of
//! the topic.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::future;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticketflow_core::event_bus::{
    Acknowledger, BusFuture, Delivery, DeliveryState, DeliveryStream, EventBus, EventBusError,
};
use ticketflow_core::message::Message;
use tokio::sync::Notify;

#[derive(Default)]
struct GroupState {
    cursor: usize,
    redeliveries: VecDeque<usize>,
    states: HashMap<usize, DeliveryState>,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, Vec<Message>>,
    groups: HashMap<(String, String), GroupState>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BusState>,
    notify: Notify,
    failing_publishes: AtomicBool,
}

impl Shared {
    /// Claim the next message for a group: redeliveries first, then new offsets.
    fn claim(&self, topic: &str, consumer_group: &str) -> Option<(usize, Message)> {
        let mut state = self.state.lock().unwrap();
        let BusState { topics, groups } = &mut *state;
        let log = topics.get(topic)?;
        let group = groups.get_mut(&(topic.to_string(), consumer_group.to_string()))?;

        let offset = match group.redeliveries.pop_front() {
            Some(offset) => offset,
            None if group.cursor < log.len() => {
                group.cursor += 1;
                group.cursor - 1
            }
            None => return None,
        };

        group.states.insert(offset, DeliveryState::InFlight);
        Some((offset, log[offset].clone()))
    }

    fn settle(&self, topic: &str, consumer_group: &str, offset: usize, state: DeliveryState) {
        let mut bus = self.state.lock().unwrap();
        if let Some(group) = bus
            .groups
            .get_mut(&(topic.to_string(), consumer_group.to_string()))
        {
            group.states.insert(offset, state);
        }
    }

    fn requeue(&self, topic: &str, consumer_group: &str, offset: usize) {
        {
            let mut bus = self.state.lock().unwrap();
            if let Some(group) = bus
                .groups
                .get_mut(&(topic.to_string(), consumer_group.to_string()))
            {
                group.redeliveries.push_back(offset);
            }
        }
        self.notify.notify_waiters();
    }
}

/// In-memory [`EventBus`] for tests.
///
/// Cheap to clone; clones share the same topics and groups.
///
/// # Example
///
/// ```
/// use ticketflow_testing::InMemoryEventBus;
/// use ticketflow_core::event_bus::EventBus;
/// use ticketflow_core::message::Message;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish("TicketPrinted", &Message::new(b"{}".to_vec())).await?;
///
/// assert_eq!(bus.published("TicketPrinted").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
    redelivery_delay: Duration,
}

impl InMemoryEventBus {
    /// Create an empty bus that redelivers nacked messages immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold nacked messages back for `delay` before redelivering them.
    #[must_use]
    pub const fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Make every publish fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.shared.failing_publishes.store(fail, Ordering::SeqCst);
    }

    /// Every message published to `topic`, in order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Message> {
        self.shared
            .state
            .lock()
            .unwrap()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// State of a message for a consumer group.
    ///
    /// `None` if the message is not on the topic or the group never subscribed.
    #[must_use]
    pub fn delivery_state(
        &self,
        topic: &str,
        consumer_group: &str,
        message_uuid: &str,
    ) -> Option<DeliveryState> {
        let state = self.shared.state.lock().unwrap();
        let offset = state
            .topics
            .get(topic)?
            .iter()
            .position(|message| message.uuid == message_uuid)?;
        let group = state
            .groups
            .get(&(topic.to_string(), consumer_group.to_string()))?;

        Some(
            group
                .states
                .get(&offset)
                .copied()
                .unwrap_or(DeliveryState::Pending),
        )
    }

    /// Number of messages the group has acked on the topic.
    #[must_use]
    pub fn acked_count(&self, topic: &str, consumer_group: &str) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .groups
            .get(&(topic.to_string(), consumer_group.to_string()))
            .map_or(0, |group| {
                group
                    .states
                    .values()
                    .filter(|state| **state == DeliveryState::Acked)
                    .count()
            })
    }

    /// Number of messages on the topic the group has not acked yet.
    #[must_use]
    pub fn unacked_count(&self, topic: &str, consumer_group: &str) -> usize {
        let total = self.published(topic).len();
        total - self.acked_count(topic, consumer_group)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, topic: &str, message: &Message) -> BusFuture<'_, ()> {
        if self.shared.failing_publishes.load(Ordering::SeqCst) {
            return Box::pin(future::ready(Err(EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: "publishing disabled".to_string(),
            })));
        }

        self.shared
            .state
            .lock()
            .unwrap()
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(message.clone());
        self.shared.notify.notify_waiters();

        Box::pin(future::ready(Ok(())))
    }

    fn subscribe(&self, topic: &str, consumer_group: &str) -> BusFuture<'_, DeliveryStream> {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.topics.entry(topic.to_string()).or_default();
            state
                .groups
                .entry((topic.to_string(), consumer_group.to_string()))
                .or_default();
        }

        let shared = Arc::clone(&self.shared);
        let topic = topic.to_string();
        let consumer_group = consumer_group.to_string();
        let redelivery_delay = self.redelivery_delay;

        // Ends once every bus handle is gone and nothing can publish any more
        let stream = async_stream::stream! {
            while Arc::strong_count(&shared) > 1 {
                let notified = shared.notify.notified();
                tokio::pin!(notified);
                // Register before claiming so a publish in between is not missed
                notified.as_mut().enable();

                if let Some((offset, message)) = shared.claim(&topic, &consumer_group) {
                    let acknowledger = InMemoryAcknowledger {
                        shared: Arc::clone(&shared),
                        topic: topic.clone(),
                        consumer_group: consumer_group.clone(),
                        offset,
                        redelivery_delay,
                        settled: false,
                    };
                    yield Ok::<_, EventBusError>(Delivery::new(message, Box::new(acknowledger)));
                    continue;
                }

                notified.await;
            }
        };

        Box::pin(future::ready(Ok(Box::pin(stream) as DeliveryStream)))
    }
}

struct InMemoryAcknowledger {
    shared: Arc<Shared>,
    topic: String,
    consumer_group: String,
    offset: usize,
    redelivery_delay: Duration,
    settled: bool,
}

impl InMemoryAcknowledger {
    fn reject(&mut self) {
        self.settled = true;
        self.shared.settle(
            &self.topic,
            &self.consumer_group,
            self.offset,
            DeliveryState::RedeliveryPending,
        );

        if self.redelivery_delay.is_zero() {
            self.shared
                .requeue(&self.topic, &self.consumer_group, self.offset);
            return;
        }

        let shared = Arc::clone(&self.shared);
        let (topic, group, offset, delay) = (
            self.topic.clone(),
            self.consumer_group.clone(),
            self.offset,
            self.redelivery_delay,
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.requeue(&topic, &group, offset);
                });
            }
            Err(_) => shared.requeue(&topic, &group, offset),
        }
    }
}

impl Acknowledger for InMemoryAcknowledger {
    fn ack(mut self: Box<Self>) -> BusFuture<'static, ()> {
        self.settled = true;
        self.shared.settle(
            &self.topic,
            &self.consumer_group,
            self.offset,
            DeliveryState::Acked,
        );
        Box::pin(future::ready(Ok(())))
    }

    fn nack(mut self: Box<Self>) -> BusFuture<'static, ()> {
        self.reject();
        Box::pin(future::ready(Ok(())))
    }
}

impl Drop for InMemoryAcknowledger {
    fn drop(&mut self) {
        if !self.settled {
            self.reject();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn message(payload: &str) -> Message {
        Message::new(payload.as_bytes().to_vec())
    }

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("delivery expected")
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn groups_have_independent_cursors() {
        let bus = InMemoryEventBus::new();
        bus.publish("t", &message("one")).await.unwrap();

        let mut a = bus.subscribe("t", "a").await.unwrap();
        let mut b = bus.subscribe("t", "b").await.unwrap();

        let from_a = next(&mut a).await;
        let from_b = next(&mut b).await;
        assert_eq!(from_a.message().payload, b"one");
        assert_eq!(from_b.message().payload, b"one");

        from_a.ack().await.unwrap();
        assert_eq!(bus.acked_count("t", "a"), 1);
        assert_eq!(bus.acked_count("t", "b"), 0);
        from_b.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nack_redelivers_to_same_group_only() {
        let bus = InMemoryEventBus::new();
        let mut a = bus.subscribe("t", "a").await.unwrap();
        let mut b = bus.subscribe("t", "b").await.unwrap();
        let published = message("one");
        bus.publish("t", &published).await.unwrap();

        next(&mut a).await.nack().await.unwrap();
        assert_eq!(
            bus.delivery_state("t", "a", &published.uuid),
            Some(DeliveryState::RedeliveryPending)
        );

        let again = next(&mut a).await;
        assert_eq!(again.message().uuid, published.uuid);
        again.ack().await.unwrap();

        next(&mut b).await.ack().await.unwrap();
        let nothing = tokio::time::timeout(Duration::from_millis(50), b.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn dropped_delivery_counts_as_nack() {
        let bus = InMemoryEventBus::new();
        let mut a = bus.subscribe("t", "a").await.unwrap();
        let published = message("one");
        bus.publish("t", &published).await.unwrap();

        drop(next(&mut a).await);

        assert_eq!(next(&mut a).await.message().uuid, published.uuid);
    }

    #[tokio::test]
    async fn state_tracks_lifecycle() {
        let bus = InMemoryEventBus::new();
        let published = message("one");
        bus.publish("t", &published).await.unwrap();
        assert_eq!(bus.delivery_state("t", "a", &published.uuid), None);

        let mut a = bus.subscribe("t", "a").await.unwrap();
        assert_eq!(
            bus.delivery_state("t", "a", &published.uuid),
            Some(DeliveryState::Pending)
        );

        let delivery = next(&mut a).await;
        assert_eq!(
            bus.delivery_state("t", "a", &published.uuid),
            Some(DeliveryState::InFlight)
        );

        delivery.ack().await.unwrap();
        assert_eq!(
            bus.delivery_state("t", "a", &published.uuid),
            Some(DeliveryState::Acked)
        );
        assert_eq!(bus.unacked_count("t", "a"), 0);
    }

    #[tokio::test]
    async fn stream_ends_when_bus_is_dropped() {
        let bus = InMemoryEventBus::new();
        let mut a = bus.subscribe("t", "a").await.unwrap();

        drop(bus);

        let end = tokio::time::timeout(Duration::from_secs(1), a.next()).await;
        assert!(matches!(end, Ok(None)));
    }

    #[tokio::test]
    async fn failing_publishes_are_rejected() {
        let bus = InMemoryEventBus::new();
        bus.fail_publishes(true);

        let result = bus.publish("t", &message("one")).await;

        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
        assert!(bus.published("t").is_empty());
    }
}
