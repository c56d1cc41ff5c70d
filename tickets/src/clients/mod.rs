//! Clients for the collaborator APIs behind the gateway.
//!
//! Each collaborator is a trait so handlers can be exercised against the
//! recording doubles in [`mocks`]. The HTTP implementations share one
//! [`Gateway`] and forward the message's correlation id on every call.

pub mod files;
pub mod mocks;
pub mod receipts;
pub mod spreadsheets;

pub use files::{FilesClient, FilesService};
pub use receipts::{IssueReceiptRequest, ReceiptsClient, ReceiptsService};
pub use spreadsheets::{SpreadsheetsClient, SpreadsheetsService};

use reqwest::{Method, RequestBuilder};
use std::time::Duration;
use thiserror::Error;
use ticketflow_runtime::HandlerError;
use ticketflow_web::CORRELATION_ID_HEADER;

/// Collaborator call failures.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The request could not be sent or the response could not be read
    #[error("Request to {service} failed: {source}")]
    Transport {
        /// Collaborator name
        service: &'static str,
        /// Underlying error
        #[source]
        source: reqwest::Error,
    },

    /// The collaborator answered with a non-2xx status
    #[error("{service} responded with {status}: {body}")]
    Status {
        /// Collaborator name
        service: &'static str,
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// A double was told to fail
    #[error("{service} unavailable")]
    Unavailable {
        /// Collaborator name
        service: &'static str,
    },
}

impl From<ClientError> for HandlerError {
    fn from(err: ClientError) -> Self {
        Self::Collaborator(err.to_string())
    }
}

/// Shared HTTP client for the gateway.
#[derive(Clone, Debug)]
pub struct Gateway {
    http: reqwest::Client,
    base_url: String,
}

impl Gateway {
    /// Create a gateway client for `base_url` (e.g. `http://localhost:8888`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| ClientError::Transport {
                service: "gateway",
                source,
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, correlation_id: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header(CORRELATION_ID_HEADER, correlation_id)
    }

    async fn send(service: &'static str, request: RequestBuilder) -> Result<(), ClientError> {
        let response = request
            .send()
            .await
            .map_err(|source| ClientError::Transport { service, source })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            service,
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let gateway = Gateway::new("http://gateway:8888/").unwrap();

        let request = gateway
            .request(Method::GET, "/health", "corr-1")
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "http://gateway:8888/health");
        assert_eq!(request.headers()[CORRELATION_ID_HEADER], "corr-1");
    }

    #[test]
    fn client_errors_become_collaborator_failures() {
        let err = HandlerError::from(ClientError::Status {
            service: "receipts",
            status: 503,
            body: "busy".to_string(),
        });

        assert!(matches!(err, HandlerError::Collaborator(msg) if msg == "receipts responded with 503: busy"));
    }
}
