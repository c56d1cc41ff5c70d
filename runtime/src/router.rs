//! Message router: binds handlers to consumer groups and drives consumption.
//!
//! Every registered binding is a (topic, consumer group, handler) triple and
//! gets its own worker task. A worker pulls one delivery at a time, runs it
//! through the middleware chain and the handler, then settles it:
//!
//! ```text
//!  delivery ──► chain + handler ──Ok──► ack   (Acked)
//!                               └─Err─► nack  (RedeliveryPending)
//! ```
//!
//! There is no dead-letter queue. A message that keeps failing stays pending
//! for its group and is redelivered until someone intervenes.
//!
//! # Shutdown
//!
//! [`RunningRouter::shutdown`] broadcasts a stop signal. Workers stop pulling
//! new deliveries. A delivery already being handled finishes its current
//! attempt, and a retry sleep that has started, but no further attempt runs;
//! it is then nacked. Workers still busy at the deadline are aborted.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut router = Router::new(bus.clone(), MiddlewareChain::standard(RetryPolicy::default()))
//!     .with_config(RouterConfig::default().consumer_group_prefix("svc-tickets."));
//!
//! router.add_handler::<TicketBookingConfirmed, _, _>("store-confirmed", move |_ctx, event| {
//!     let repo = repo.clone();
//!     async move { store(&*repo, &event).await }
//! })?;
//!
//! let running = router.run().await?;
//! // ...
//! running.shutdown(Duration::from_secs(10)).await;
//! ```

use crate::metrics::HandlerMetrics;
use crate::middleware::{Handler, HandlerResult, MessageContext, MiddlewareChain};
use futures::StreamExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use ticketflow_core::event::Event;
use ticketflow_core::event_bus::{Delivery, DeliveryState, DeliveryStream, EventBus, EventBusError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors raised while registering or starting handlers.
#[derive(Error, Debug)]
pub enum RouterError {
    /// A second handler tried to use a consumer group already bound on the topic.
    #[error("Consumer group '{consumer_group}' is already bound to topic '{topic}'")]
    DuplicateConsumerGroup {
        /// The topic
        topic: String,
        /// The consumer group
        consumer_group: String,
    },

    /// Subscribing a binding failed at startup.
    #[error(transparent)]
    Subscription(#[from] EventBusError),
}

/// Router settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Prepended to handler names to form consumer group names.
    pub consumer_group_prefix: String,
    /// Delay before resubscribing after a delivery stream ends.
    pub resubscribe_delay: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            consumer_group_prefix: String::new(),
            resubscribe_delay: Duration::from_secs(5),
        }
    }
}

impl RouterConfig {
    /// Set the consumer group prefix.
    #[must_use]
    pub fn consumer_group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_group_prefix = prefix.into();
        self
    }

    /// Set the resubscribe delay.
    #[must_use]
    pub const fn resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }
}

#[derive(Debug)]
struct Binding {
    name: String,
    topic: String,
    consumer_group: String,
    handler: Handler,
}

/// Handler registry. Consumed by [`Router::run`].
pub struct Router {
    bus: Arc<dyn EventBus>,
    chain: MiddlewareChain,
    config: RouterConfig,
    bindings: Vec<Binding>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("chain", &self.chain)
            .field("config", &self.config)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Create a router consuming from `bus` and wrapping every handler in `chain`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, chain: MiddlewareChain) -> Self {
        Self {
            bus,
            chain,
            config: RouterConfig::default(),
            bindings: Vec::new(),
        }
    }

    /// Replace the router settings.
    #[must_use]
    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind a raw handler to its own consumer group on a topic.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicateConsumerGroup`] if the group is already
    /// bound on the same topic.
    pub fn register(
        &mut self,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        handler: Handler,
    ) -> Result<&mut Self, RouterError> {
        let topic = topic.into();
        let consumer_group = consumer_group.into();

        if self
            .bindings
            .iter()
            .any(|b| b.topic == topic && b.consumer_group == consumer_group)
        {
            return Err(RouterError::DuplicateConsumerGroup {
                topic,
                consumer_group,
            });
        }

        debug!(topic = %topic, consumer_group = %consumer_group, "Handler registered");
        self.bindings.push(Binding {
            name: consumer_group.clone(),
            topic,
            consumer_group,
            handler,
        });
        Ok(self)
    }

    /// Bind a typed handler.
    ///
    /// The topic comes from `E`'s kind and the consumer group is the configured
    /// prefix followed by `name`. The payload is decoded into `E` before `f`
    /// runs; a payload that does not decode fails the invocation.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicateConsumerGroup`] if `name` is already used
    /// for this event kind.
    pub fn add_handler<E, F, Fut>(&mut self, name: &str, f: F) -> Result<&mut Self, RouterError>
    where
        E: Event,
        F: Fn(MessageContext, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let consumer_group = format!("{}{name}", self.config.consumer_group_prefix);
        let handler = Handler::new(move |ctx: MessageContext| {
            let decoded = E::from_payload(&ctx.message.payload);
            let invocation = decoded.map(|event| f(ctx, event));
            async move { invocation?.await }
        });

        self.register(E::KIND.topic(), consumer_group, handler)?;
        if let Some(binding) = self.bindings.last_mut() {
            binding.name = name.to_string();
        }
        Ok(self)
    }

    /// (topic, consumer group) of every binding, in registration order.
    #[must_use]
    pub fn bindings(&self) -> Vec<(&str, &str)> {
        self.bindings
            .iter()
            .map(|b| (b.topic.as_str(), b.consumer_group.as_str()))
            .collect()
    }

    /// Subscribe every binding and start one worker per binding.
    ///
    /// All subscriptions are made before any worker starts, so a bus that is
    /// unreachable at startup fails here instead of inside a worker.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Subscription`] if any subscription fails.
    pub async fn run(self) -> Result<RunningRouter, RouterError> {
        let Self {
            bus,
            chain,
            config,
            bindings,
        } = self;

        let mut subscribed = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let stream = bus
                .subscribe(&binding.topic, &binding.consumer_group)
                .await?;
            subscribed.push((binding, stream));
        }

        let (shutdown_tx, _) = watch::channel(false);
        let workers = subscribed
            .into_iter()
            .map(|(binding, stream)| {
                let name = binding.name.clone();
                let worker = Worker {
                    handler: chain.apply(binding.handler),
                    name: binding.name,
                    topic: binding.topic,
                    consumer_group: binding.consumer_group,
                    bus: Arc::clone(&bus),
                    shutdown: shutdown_tx.subscribe(),
                    resubscribe_delay: config.resubscribe_delay,
                };
                (name, tokio::spawn(worker.run(stream)))
            })
            .collect::<Vec<_>>();

        info!(
            workers = workers.len(),
            middleware = ?chain,
            "Router running"
        );

        Ok(RunningRouter {
            shutdown_tx,
            workers,
        })
    }
}

/// Outcome of [`RunningRouter::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that stopped on their own.
    pub stopped: usize,
    /// Workers aborted at the deadline (or that panicked), by handler name.
    pub abandoned: Vec<String>,
}

/// Handle to the running workers.
pub struct RunningRouter {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<(String, JoinHandle<()>)>,
}

impl RunningRouter {
    /// Number of running workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop all workers, waiting at most `deadline` for in-flight messages.
    pub async fn shutdown(self, deadline: Duration) -> ShutdownReport {
        info!(workers = self.workers.len(), "Router shutting down");
        self.shutdown_tx.send_replace(true);

        let deadline_at = tokio::time::Instant::now() + deadline;
        let mut report = ShutdownReport::default();

        for (name, mut handle) in self.workers {
            match tokio::time::timeout_at(deadline_at, &mut handle).await {
                Ok(Ok(())) => report.stopped += 1,
                Ok(Err(error)) => {
                    warn!(handler = %name, error = %error, "Handler worker failed");
                    report.abandoned.push(name);
                }
                Err(_) => {
                    warn!(handler = %name, "Handler worker shutdown timed out, aborting");
                    handle.abort();
                    report.abandoned.push(name);
                }
            }
        }

        info!(
            stopped = report.stopped,
            abandoned = report.abandoned.len(),
            "Router stopped"
        );
        report
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Closed,
}

struct Worker {
    name: String,
    topic: String,
    consumer_group: String,
    handler: Handler,
    bus: Arc<dyn EventBus>,
    shutdown: watch::Receiver<bool>,
    resubscribe_delay: Duration,
}

/// Resolves once shutdown is requested or the router handle is gone.
async fn stopping(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

impl Worker {
    async fn run(mut self, mut stream: DeliveryStream) {
        info!(
            handler = %self.name,
            topic = %self.topic,
            consumer_group = %self.consumer_group,
            "Handler worker started"
        );

        while self.consume(&mut stream).await == StreamEnd::Closed {
            match self.resubscribe().await {
                Some(next) => stream = next,
                None => break,
            }
        }

        info!(handler = %self.name, "Handler worker stopped");
    }

    /// Process deliveries until shutdown or until the stream ends.
    async fn consume(&mut self, stream: &mut DeliveryStream) -> StreamEnd {
        loop {
            tokio::select! {
                biased;
                () = stopping(&mut self.shutdown) => return StreamEnd::Shutdown,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.process(delivery).await,
                    Some(Err(error)) => {
                        HandlerMetrics::record_consume_error(&self.topic);
                        error!(
                            handler = %self.name,
                            error = %error,
                            "Error receiving message from stream"
                        );
                    }
                    None => {
                        warn!(handler = %self.name, "Delivery stream ended");
                        return StreamEnd::Closed;
                    }
                },
            }
        }
    }

    async fn resubscribe(&mut self) -> Option<DeliveryStream> {
        loop {
            tokio::select! {
                biased;
                () = stopping(&mut self.shutdown) => return None,
                () = tokio::time::sleep(self.resubscribe_delay) => {}
            }

            match self.bus.subscribe(&self.topic, &self.consumer_group).await {
                Ok(stream) => {
                    info!(handler = %self.name, "Resubscribed");
                    return Some(stream);
                }
                Err(error) => error!(
                    handler = %self.name,
                    error = %error,
                    "Failed to resubscribe, retrying in {:?}",
                    self.resubscribe_delay
                ),
            }
        }
    }

    async fn process(&self, delivery: Delivery) {
        let (message, acknowledger) = delivery.into_parts();
        let message_uuid = message.uuid.clone();
        debug!(
            handler = %self.name,
            message_uuid = %message_uuid,
            state = ?DeliveryState::InFlight,
            "Dispatching message"
        );

        let started = Instant::now();
        let ctx = MessageContext::new(message).with_shutdown(self.shutdown.clone());
        match self.handler.call(ctx).await {
            Ok(()) => {
                HandlerMetrics::record_ack(&self.consumer_group, started.elapsed());
                match acknowledger.ack().await {
                    Ok(()) => debug!(
                        handler = %self.name,
                        message_uuid = %message_uuid,
                        state = ?DeliveryState::Acked,
                        "Message acknowledged"
                    ),
                    Err(error) => warn!(
                        handler = %self.name,
                        message_uuid = %message_uuid,
                        error = %error,
                        "Failed to ack message (it may be redelivered)"
                    ),
                }
            }
            Err(handler_error) => {
                HandlerMetrics::record_nack(&self.consumer_group, started.elapsed());
                warn!(
                    handler = %self.name,
                    message_uuid = %message_uuid,
                    error = %handler_error,
                    state = ?DeliveryState::RedeliveryPending,
                    "Message not processed, leaving it for redelivery"
                );
                if let Err(error) = acknowledger.nack().await {
                    warn!(
                        handler = %self.name,
                        message_uuid = %message_uuid,
                        error = %error,
                        "Failed to nack message"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::HandlerError;
    use crate::retry::RetryPolicy;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use ticketflow_core::event::{EventHeader, TicketPrinted};
    use ticketflow_core::message::{CORRELATION_ID_KEY, Message, TYPE_KEY};
    use ticketflow_testing::{InMemoryEventBus, wait_until};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    const TOPIC: &str = "TicketPrinted";

    /// Records (level, message) of every log event.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<(tracing::Level, String)>>>);

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for Captured {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), visitor.0));
        }
    }

    impl Captured {
        fn count(&self, level: tracing::Level, message: &str) -> usize {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, m)| *l == level && m == message)
                .count()
        }

        fn count_level(&self, level: tracing::Level) -> usize {
            self.0.lock().unwrap().iter().filter(|(l, _)| *l == level).count()
        }
    }

    fn fast_chain(max_retries: usize) -> MiddlewareChain {
        MiddlewareChain::standard(
            RetryPolicy::builder()
                .max_retries(max_retries)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(2))
                .build(),
        )
    }

    fn printed_message() -> Message {
        let event = TicketPrinted {
            header: EventHeader::new("key", ticketflow_core::Utc::now()),
            ticket_id: "T1".to_string(),
            file_name: "T1-ticket.html".to_string(),
        };
        Message::new(event.to_payload().unwrap())
            .with_metadata(TYPE_KEY, TOPIC)
            .with_metadata(CORRELATION_ID_KEY, "corr-1")
    }

    fn counting_handler(calls: Arc<AtomicUsize>, failures: usize) -> Handler {
        Handler::new(move |_ctx| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < failures {
                    Err(HandlerError::Collaborator("unavailable".to_string()))
                } else {
                    Ok(())
                }
            }
        })
    }

    #[test]
    fn same_group_twice_on_a_topic_is_rejected() {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut router = Router::new(bus, MiddlewareChain::new());
        let noop = Handler::new(|_ctx| async { Ok(()) });

        router.register(TOPIC, "group-a", noop.clone()).unwrap();
        router.register("OtherTopic", "group-a", noop.clone()).unwrap();
        let err = router.register(TOPIC, "group-a", noop).unwrap_err();

        assert!(matches!(err, RouterError::DuplicateConsumerGroup { .. }));
    }

    #[test]
    fn router_debug_lists_bindings() {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut router = Router::new(bus, MiddlewareChain::new());
        router
            .register(TOPIC, "group-a", Handler::new(|_ctx| async { Ok(()) }))
            .unwrap();

        let debug = format!("{router:?}");

        assert!(debug.starts_with("Router {"));
        assert!(debug.contains("group-a"));
    }

    #[test]
    fn typed_handlers_use_prefixed_group_names() {
        let bus = Arc::new(InMemoryEventBus::new());
        let mut router = Router::new(bus, MiddlewareChain::new())
            .with_config(RouterConfig::default().consumer_group_prefix("svc-tickets."));

        router
            .add_handler::<TicketPrinted, _, _>("archive", |_ctx, _event| async { Ok(()) })
            .unwrap();

        assert_eq!(router.bindings(), vec![(TOPIC, "svc-tickets.archive")]);
    }

    #[tokio::test]
    async fn every_group_on_a_topic_sees_every_message() {
        let bus = Arc::new(InMemoryEventBus::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new(bus.clone(), fast_chain(0));
        router.register(TOPIC, "a", counting_handler(Arc::clone(&first), 0)).unwrap();
        router.register(TOPIC, "b", counting_handler(Arc::clone(&second), 0)).unwrap();
        let running = router.run().await.unwrap();

        for _ in 0..3 {
            bus.publish(TOPIC, &printed_message()).await.unwrap();
        }

        wait_until(Duration::from_secs(5), || {
            first.load(Ordering::SeqCst) == 3 && second.load(Ordering::SeqCst) == 3
        })
        .await
        .expect("both groups should handle all messages");
        wait_until(Duration::from_secs(5), || bus.acked_count(TOPIC, "a") == 3 && bus.acked_count(TOPIC, "b") == 3)
            .await
            .expect("all messages acked");

        running.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_acked() {
        let bus = Arc::new(InMemoryEventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new(bus.clone(), fast_chain(5));
        router.register(TOPIC, "flaky", counting_handler(Arc::clone(&calls), 3)).unwrap();
        let running = router.run().await.unwrap();

        let message = printed_message();
        bus.publish(TOPIC, &message).await.unwrap();

        wait_until(Duration::from_secs(5), || {
            bus.delivery_state(TOPIC, "flaky", &message.uuid) == Some(DeliveryState::Acked)
        })
        .await
        .expect("message should be acked");
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        running.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn exhausted_retries_leave_message_for_redelivery() {
        let captured = Captured::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(captured.clone()),
        );

        let bus = Arc::new(InMemoryEventBus::new().with_redelivery_delay(Duration::from_secs(3600)));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new(bus.clone(), fast_chain(2));
        router
            .register(TOPIC, "broken", counting_handler(Arc::clone(&calls), usize::MAX))
            .unwrap();
        let running = router.run().await.unwrap();

        let message = printed_message();
        bus.publish(TOPIC, &message).await.unwrap();

        wait_until(Duration::from_secs(5), || {
            bus.delivery_state(TOPIC, "broken", &message.uuid) == Some(DeliveryState::RedeliveryPending)
        })
        .await
        .expect("message should be nacked");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(bus.acked_count(TOPIC, "broken"), 0);
        assert_eq!(captured.count(tracing::Level::ERROR, "Message handling error"), 1);
        assert_eq!(captured.count_level(tracing::Level::ERROR), 1);

        running.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn nacked_message_is_redelivered_to_its_group_only() {
        let bus = Arc::new(InMemoryEventBus::new());
        let flaky_calls = Arc::new(AtomicUsize::new(0));
        let steady_calls = Arc::new(AtomicUsize::new(0));
        // No retries: the first failure is a nack and the second delivery succeeds
        let mut router = Router::new(bus.clone(), fast_chain(0));
        router.register(TOPIC, "flaky", counting_handler(Arc::clone(&flaky_calls), 1)).unwrap();
        router.register(TOPIC, "steady", counting_handler(Arc::clone(&steady_calls), 0)).unwrap();
        let running = router.run().await.unwrap();

        let message = printed_message();
        bus.publish(TOPIC, &message).await.unwrap();

        wait_until(Duration::from_secs(5), || {
            bus.delivery_state(TOPIC, "flaky", &message.uuid) == Some(DeliveryState::Acked)
                && bus.delivery_state(TOPIC, "steady", &message.uuid) == Some(DeliveryState::Acked)
        })
        .await
        .expect("both groups should ack");

        assert_eq!(flaky_calls.load(Ordering::SeqCst), 2);
        assert_eq!(steady_calls.load(Ordering::SeqCst), 1);

        running.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn untyped_message_never_reaches_handler() {
        let captured = Captured::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(captured.clone()),
        );

        let bus = Arc::new(InMemoryEventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new(bus.clone(), fast_chain(3));
        router.register(TOPIC, "typed-only", counting_handler(Arc::clone(&calls), 0)).unwrap();
        let running = router.run().await.unwrap();

        let mut message = printed_message();
        message.metadata.remove(TYPE_KEY);
        bus.publish(TOPIC, &message).await.unwrap();

        wait_until(Duration::from_secs(5), || {
            bus.delivery_state(TOPIC, "typed-only", &message.uuid) == Some(DeliveryState::Acked)
        })
        .await
        .expect("dropped message is acked");

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(captured.count(tracing::Level::WARN, "Retries exhausted"), 0);
        assert_eq!(captured.count(tracing::Level::ERROR, "Message handling error"), 0);

        running.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn undecodable_payload_fails_typed_handler() {
        let bus = Arc::new(InMemoryEventBus::new().with_redelivery_delay(Duration::from_secs(3600)));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut router = Router::new(bus.clone(), fast_chain(0));
        router
            .add_handler::<TicketPrinted, _, _>("strict", move |_ctx, _event| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .unwrap();
        let running = router.run().await.unwrap();

        let message = Message::new(b"{}".to_vec()).with_metadata(TYPE_KEY, TOPIC);
        bus.publish(TOPIC, &message).await.unwrap();

        wait_until(Duration::from_secs(5), || {
            bus.delivery_state(TOPIC, "strict", &message.uuid) == Some(DeliveryState::RedeliveryPending)
        })
        .await
        .expect("undecodable message is nacked");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        running.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn shutdown_lets_in_flight_message_finish() {
        let bus = Arc::new(InMemoryEventBus::new());
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        let handler = Handler::new(move |_ctx| {
            let (s, f) = (Arc::clone(&s), Arc::clone(&f));
            async move {
                s.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                f.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
        let mut router = Router::new(bus.clone(), MiddlewareChain::new());
        router.register(TOPIC, "slow", handler).unwrap();
        let running = router.run().await.unwrap();

        bus.publish(TOPIC, &printed_message()).await.unwrap();
        wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst))
            .await
            .expect("handler should start");

        let report = running.shutdown(Duration::from_secs(5)).await;

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(report, ShutdownReport { stopped: 1, abandoned: vec![] });
        assert_eq!(bus.acked_count(TOPIC, "slow"), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_retrying_and_nacks() {
        let bus = Arc::new(InMemoryEventBus::new().with_redelivery_delay(Duration::from_secs(3600)));
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = MiddlewareChain::standard(
            RetryPolicy::builder()
                .max_retries(1000)
                .initial_delay(Duration::from_millis(20))
                .max_delay(Duration::from_millis(20))
                .build(),
        );
        let mut router = Router::new(bus.clone(), chain);
        router
            .register(TOPIC, "failing", counting_handler(Arc::clone(&calls), usize::MAX))
            .unwrap();
        let running = router.run().await.unwrap();

        let message = printed_message();
        bus.publish(TOPIC, &message).await.unwrap();
        wait_until(Duration::from_secs(5), || calls.load(Ordering::SeqCst) >= 2)
            .await
            .expect("handler should be retrying");

        let report = running.shutdown(Duration::from_secs(5)).await;
        let calls_after_shutdown = calls.load(Ordering::SeqCst);

        assert_eq!(report, ShutdownReport { stopped: 1, abandoned: vec![] });
        assert!(calls_after_shutdown < 10, "kept retrying: {calls_after_shutdown}");
        assert_eq!(
            bus.delivery_state(TOPIC, "failing", &message.uuid),
            Some(DeliveryState::RedeliveryPending)
        );
    }

    #[tokio::test]
    async fn shutdown_abandons_workers_at_deadline() {
        let bus = Arc::new(InMemoryEventBus::new());
        let started = Arc::new(AtomicBool::new(false));
        let s = Arc::clone(&started);
        let handler = Handler::new(move |_ctx| {
            let s = Arc::clone(&s);
            async move {
                s.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        });
        let mut router = Router::new(bus.clone(), MiddlewareChain::new());
        router.register(TOPIC, "stuck", handler).unwrap();
        let running = router.run().await.unwrap();

        let message = printed_message();
        bus.publish(TOPIC, &message).await.unwrap();
        wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst))
            .await
            .expect("handler should start");

        let report = running.shutdown(Duration::from_millis(50)).await;

        assert_eq!(report.stopped, 0);
        assert_eq!(report.abandoned, vec!["stuck".to_string()]);
        assert_ne!(bus.delivery_state(TOPIC, "stuck", &message.uuid), Some(DeliveryState::Acked));
    }
}
