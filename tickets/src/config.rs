//! Configuration management for the tickets service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Only `POSTGRES_URL` and `GATEWAY_ADDR` are required.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use ticketflow_runtime::{RetryPolicy, RouterConfig};

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but does not parse
    #[error("Invalid value '{value}' for environment variable {name}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and metrics servers
    pub server: ServerConfig,
    /// Ticket storage
    pub postgres: PostgresConfig,
    /// Event bus
    pub redpanda: RedpandaConfig,
    /// Outbound collaborator APIs
    pub gateway: GatewayConfig,
    /// Message router and retry middleware
    pub router: RouterSettings,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// RedPanda/Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Where new consumer groups start: `earliest` or `latest`
    pub auto_offset_reset: String,
}

/// Gateway in front of the receipts, spreadsheets and files APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL, e.g. `http://localhost:8888`
    pub addr: String,
}

/// Router and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Prepended to handler names to form consumer groups
    pub consumer_group_prefix: String,
    /// Delay before a worker resubscribes after its stream ended
    pub resubscribe_delay_ms: u64,
    /// Retries after the first attempt
    pub retry_max_retries: usize,
    /// Delay before the first retry
    pub retry_initial_interval_ms: u64,
    /// Upper bound for any retry delay
    pub retry_max_interval_ms: u64,
    /// Backoff multiplier
    pub retry_multiplier: f64,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file, if present, should be loaded with `dotenvy` first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        Ok(Self {
            server: ServerConfig {
                host: vars.string_or("HOST", "0.0.0.0"),
                port: vars.parse_or("PORT", 8080)?,
                shutdown_timeout: vars.parse_or("SHUTDOWN_TIMEOUT", 10)?,
                metrics_host: vars.string_or("METRICS_HOST", "0.0.0.0"),
                metrics_port: vars.parse_or("METRICS_PORT", 9090)?,
            },
            postgres: PostgresConfig {
                url: vars.required("POSTGRES_URL")?,
                max_connections: vars.parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            redpanda: RedpandaConfig {
                brokers: vars.string_or("REDPANDA_BROKERS", "localhost:9092"),
                auto_offset_reset: vars.string_or("REDPANDA_AUTO_OFFSET_RESET", "earliest"),
            },
            gateway: GatewayConfig {
                addr: vars.required("GATEWAY_ADDR")?,
            },
            router: RouterSettings {
                consumer_group_prefix: vars.string_or("CONSUMER_GROUP_PREFIX", "svc-tickets."),
                resubscribe_delay_ms: vars.parse_or("RESUBSCRIBE_DELAY_MS", 5000)?,
                retry_max_retries: vars.parse_or("RETRY_MAX_RETRIES", 10)?,
                retry_initial_interval_ms: vars.parse_or("RETRY_INITIAL_INTERVAL_MS", 100)?,
                retry_max_interval_ms: vars.parse_or("RETRY_MAX_INTERVAL_MS", 1000)?,
                retry_multiplier: vars.parse_or("RETRY_MULTIPLIER", 2.0)?,
            },
        })
    }
}

impl ServerConfig {
    /// Address of the HTTP API.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if host and port do not form a socket address.
    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr("HOST", &self.host, self.port)
    }

    /// Address of the Prometheus scrape endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if host and port do not form a socket address.
    pub fn metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr("METRICS_HOST", &self.metrics_host, self.metrics_port)
    }

    /// How long in-flight messages get to finish on shutdown.
    #[must_use]
    pub const fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

impl RouterSettings {
    /// Retry policy for the retry middleware. Backoff has no jitter.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.retry_max_retries)
            .initial_delay(Duration::from_millis(self.retry_initial_interval_ms))
            .max_delay(Duration::from_millis(self.retry_max_interval_ms))
            .multiplier(self.retry_multiplier)
            .randomization_factor(0.0)
            .build()
    }

    /// Router settings derived from this section.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::default()
            .consumer_group_prefix(self.consumer_group_prefix.clone())
            .resubscribe_delay(Duration::from_millis(self.resubscribe_delay_ms))
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }
}

fn socket_addr(name: &'static str, host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    format!("{host}:{port}")
        .parse()
        .map_err(|_| ConfigError::Invalid {
            name,
            value: host.to_string(),
        })
}
