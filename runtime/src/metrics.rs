//! Prometheus metrics for the event pipeline.
//!
//! Covered components:
//! - Handler workers (acks, nacks, handling time, stream errors)
//! - Middleware (retries, dropped messages)
//! - Event publishing
//! - Ticket storage
//!
//! # Example
//!
//! ```rust,no_run
//! use ticketflow_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Serve `server.render()` from an HTTP endpoint for scraping
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind HTTP server
    #[error("Failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Prometheus recorder plus the address its scrape endpoint should listen on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the scrape endpoint should bind to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] or [`MetricsError::Install`] if the
    /// exporter cannot be set up. A recorder that is already installed (several
    /// servers in one test binary) is not an error; `render` then returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Handler workers
    describe_counter!(
        "ticketflow_messages_acked_total",
        "Messages handled successfully and acknowledged"
    );
    describe_counter!(
        "ticketflow_messages_nacked_total",
        "Messages that failed handling and were left for redelivery"
    );
    describe_counter!(
        "ticketflow_consume_errors_total",
        "Errors received from delivery streams"
    );
    describe_histogram!(
        "ticketflow_handler_duration_seconds",
        "Time spent in the middleware chain and handler per delivery"
    );

    // Middleware
    describe_counter!(
        "ticketflow_handler_retries_total",
        "Handler attempts repeated by the retry stage"
    );
    describe_counter!(
        "ticketflow_messages_dropped_total",
        "Messages dropped because they carry no type tag"
    );

    // Publishing
    describe_counter!(
        "ticketflow_events_published_total",
        "Events appended to the bus"
    );
    describe_counter!(
        "ticketflow_publish_errors_total",
        "Events the bus refused"
    );

    // Storage
    describe_counter!(
        "ticketflow_tickets_stored_total",
        "Confirmed tickets written to storage"
    );
    describe_counter!(
        "ticketflow_tickets_deleted_total",
        "Canceled tickets removed from storage"
    );
}

/// Handler worker metrics recorder.
pub struct HandlerMetrics;

impl HandlerMetrics {
    /// Record an acknowledged delivery.
    pub fn record_ack(consumer_group: &str, duration: Duration) {
        counter!("ticketflow_messages_acked_total", "consumer_group" => consumer_group.to_string())
            .increment(1);
        histogram!("ticketflow_handler_duration_seconds", "consumer_group" => consumer_group.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a delivery left for redelivery.
    pub fn record_nack(consumer_group: &str, duration: Duration) {
        counter!("ticketflow_messages_nacked_total", "consumer_group" => consumer_group.to_string())
            .increment(1);
        histogram!("ticketflow_handler_duration_seconds", "consumer_group" => consumer_group.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record an error item from a delivery stream.
    pub fn record_consume_error(topic: &str) {
        counter!("ticketflow_consume_errors_total", "topic" => topic.to_string()).increment(1);
    }
}

/// Middleware metrics recorder.
pub struct MiddlewareMetrics;

impl MiddlewareMetrics {
    /// Record a repeated handler attempt.
    pub fn record_retry() {
        counter!("ticketflow_handler_retries_total").increment(1);
    }

    /// Record a message dropped for lacking a type tag.
    pub fn record_dropped() {
        counter!("ticketflow_messages_dropped_total").increment(1);
    }
}

/// Publishing metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a published event of the given kind.
    pub fn record_publish(kind: &'static str) {
        counter!("ticketflow_events_published_total", "kind" => kind).increment(1);
    }

    /// Record a refused publish.
    pub fn record_error(kind: &'static str) {
        counter!("ticketflow_publish_errors_total", "kind" => kind).increment(1);
    }
}

/// Ticket storage metrics recorder.
pub struct TicketMetrics;

impl TicketMetrics {
    /// Record a stored ticket.
    pub fn record_stored() {
        counter!("ticketflow_tickets_stored_total").increment(1);
    }

    /// Record a removed ticket.
    pub fn record_deleted() {
        counter!("ticketflow_tickets_deleted_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    fn test_metrics_server_start_is_repeatable() {
        let mut first = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        let mut second = MetricsServer::new("127.0.0.1:0".parse().unwrap());

        assert!(first.start().is_ok());
        assert!(second.start().is_ok());
    }

    #[test]
    fn test_metrics_server_render() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        HandlerMetrics::record_ack("svc-tickets.print-ticket", Duration::from_millis(5));
        PublishMetrics::record_publish("TicketPrinted");
        TicketMetrics::record_stored();

        // Another test may have installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("ticketflow_messages_acked_total"));
            assert!(rendered.contains("ticketflow_events_published_total"));
            assert!(rendered.contains("ticketflow_tickets_stored_total"));
        }
    }
}
