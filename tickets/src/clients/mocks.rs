//! Recording doubles for the collaborator traits.
//!
//! Used by the component tests and for running the service without a gateway.

#![allow(clippy::unwrap_used)] // Test doubles use unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use super::{ClientError, FilesService, IssueReceiptRequest, ReceiptsService, SpreadsheetsService};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

fn take_failure(counter: &AtomicUsize, service: &'static str) -> Result<(), ClientError> {
    match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
        Ok(_) => Err(ClientError::Unavailable { service }),
        Err(_) => Ok(()),
    }
}

/// Receipts double that records every issued receipt.
#[derive(Debug, Default)]
pub struct MockReceipts {
    issued: Mutex<Vec<(String, IssueReceiptRequest)>>,
    failures: AtomicUsize,
}

impl MockReceipts {
    /// Create an empty double.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Issued receipts, in call order.
    #[must_use]
    pub fn issued(&self) -> Vec<IssueReceiptRequest> {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Correlation ids seen, in call order.
    #[must_use]
    pub fn correlation_ids(&self) -> Vec<String> {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl ReceiptsService for MockReceipts {
    async fn issue_receipt(
        &self,
        correlation_id: &str,
        request: IssueReceiptRequest,
    ) -> Result<(), ClientError> {
        take_failure(&self.failures, "receipts")?;
        self.issued
            .lock()
            .unwrap()
            .push((correlation_id.to_string(), request));
        Ok(())
    }
}

/// Spreadsheets double keeping appended rows per sheet.
#[derive(Debug, Default)]
pub struct MockSpreadsheets {
    rows: Mutex<BTreeMap<String, Vec<Vec<String>>>>,
    failures: AtomicUsize,
}

impl MockSpreadsheets {
    /// Create an empty double.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Rows appended to `sheet`, in call order.
    #[must_use]
    pub fn rows(&self, sheet: &str) -> Vec<Vec<String>> {
        self.rows
            .lock()
            .unwrap()
            .get(sheet)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SpreadsheetsService for MockSpreadsheets {
    async fn append_row(
        &self,
        _correlation_id: &str,
        sheet: &str,
        row: Vec<String>,
    ) -> Result<(), ClientError> {
        take_failure(&self.failures, "spreadsheets")?;
        self.rows
            .lock()
            .unwrap()
            .entry(sheet.to_string())
            .or_default()
            .push(row);
        Ok(())
    }
}

/// Files double keeping the latest content per file id.
#[derive(Debug, Default)]
pub struct MockFiles {
    files: Mutex<BTreeMap<String, String>>,
}

impl MockFiles {
    /// Create an empty double.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Content stored under `file_id`.
    #[must_use]
    pub fn get(&self, file_id: &str) -> Option<String> {
        self.files.lock().unwrap().get(file_id).cloned()
    }
}

#[async_trait]
impl FilesService for MockFiles {
    async fn put_file(
        &self,
        _correlation_id: &str,
        file_id: &str,
        content: &str,
    ) -> Result<(), ClientError> {
        self.files
            .lock()
            .unwrap()
            .insert(file_id.to_string(), content.to_string());
        Ok(())
    }
}
