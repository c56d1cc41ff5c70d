//! Idempotent ticket storage.
//!
//! Writes are safe to repeat: `put` keeps the first row written for a ticket id,
//! and `delete` of a missing ticket succeeds. Handlers rely on this because the
//! bus redelivers messages.

use crate::ticket::TicketRecord;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors returned by ticket storage.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Cannot reach the database.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A query failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// A stored row could not be mapped back to a record.
    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

/// Boxed future returned by repository operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Ticket storage with idempotent writes.
pub trait TicketRepository: Send + Sync {
    /// Insert the record unless one with the same id exists (first write wins).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on database failure.
    fn put(&self, record: &TicketRecord) -> StorageFuture<'_, ()>;

    /// Remove the record if present.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on database failure.
    fn delete(&self, ticket_id: &str) -> StorageFuture<'_, ()>;

    /// All stored records.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on database failure.
    fn list_all(&self) -> StorageFuture<'_, Vec<TicketRecord>>;
}
