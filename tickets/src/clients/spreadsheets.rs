//! Spreadsheets API.

use super::{ClientError, Gateway};
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;

/// Appends rows to named spreadsheets.
///
/// Appends are not idempotent: a redelivered event adds the row again.
#[async_trait]
pub trait SpreadsheetsService: Send + Sync {
    /// Append one row to `sheet`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the row could not be appended.
    async fn append_row(
        &self,
        correlation_id: &str,
        sheet: &str,
        row: Vec<String>,
    ) -> Result<(), ClientError>;
}

#[derive(Serialize)]
struct AppendRowBody {
    columns: Vec<String>,
}

/// `POST {gateway}/spreadsheets-api/sheets/{sheet}/row`
#[derive(Clone, Debug)]
pub struct SpreadsheetsClient {
    gateway: Gateway,
}

impl SpreadsheetsClient {
    /// Create a spreadsheets client on top of `gateway`.
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl SpreadsheetsService for SpreadsheetsClient {
    async fn append_row(
        &self,
        correlation_id: &str,
        sheet: &str,
        row: Vec<String>,
    ) -> Result<(), ClientError> {
        let builder = self
            .gateway
            .request(
                Method::POST,
                &format!("/spreadsheets-api/sheets/{sheet}/row"),
                correlation_id,
            )
            .json(&AppendRowBody { columns: row });

        Gateway::send("spreadsheets", builder).await
    }
}
