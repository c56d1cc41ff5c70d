//! In-memory ticket storage.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::future;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use ticketflow_core::repository::{StorageError, StorageFuture, TicketRepository};
use ticketflow_core::ticket::TicketRecord;

/// `BTreeMap`-backed [`TicketRepository`] with first-write-wins puts.
///
/// Amounts are rounded to two decimals on write, like a `NUMERIC(10,2)`
/// column would.
///
/// # Example
///
/// ```
/// use ticketflow_testing::InMemoryTicketRepository;
/// use ticketflow_core::repository::TicketRepository;
/// use ticketflow_core::ticket::TicketRecord;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let repo = InMemoryTicketRepository::new();
/// let record = TicketRecord {
///     ticket_id: "T1".to_string(),
///     price_amount: 10.5,
///     price_currency: "USD".to_string(),
///     customer_email: "a@b.com".to_string(),
/// };
///
/// repo.put(&record).await?;
/// repo.put(&record).await?;
/// assert_eq!(repo.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketRepository {
    tickets: Arc<RwLock<BTreeMap<String, TicketRecord>>>,
    failing_calls: Arc<AtomicUsize>,
}

impl InMemoryTicketRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls (of any kind) fail with a connection error.
    pub fn fail_next(&self, count: usize) {
        self.failing_calls.store(count, Ordering::SeqCst);
    }

    /// Stored record for a ticket id.
    #[must_use]
    pub fn get(&self, ticket_id: &str) -> Option<TicketRecord> {
        self.tickets.read().unwrap().get(ticket_id).cloned()
    }

    /// Number of stored tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.read().unwrap().len()
    }

    /// Check if the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.read().unwrap().is_empty()
    }

    fn injected_failure(&self) -> Option<StorageError> {
        self.failing_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| StorageError::Connection("injected failure".to_string()))
    }
}

impl TicketRepository for InMemoryTicketRepository {
    fn put(&self, record: &TicketRecord) -> StorageFuture<'_, ()> {
        if let Some(error) = self.injected_failure() {
            return Box::pin(future::ready(Err(error)));
        }

        let mut stored = record.clone();
        stored.price_amount = (stored.price_amount * 100.0).round() / 100.0;
        self.tickets
            .write()
            .unwrap()
            .entry(stored.ticket_id.clone())
            .or_insert(stored);
        Box::pin(future::ready(Ok(())))
    }

    fn delete(&self, ticket_id: &str) -> StorageFuture<'_, ()> {
        if let Some(error) = self.injected_failure() {
            return Box::pin(future::ready(Err(error)));
        }

        self.tickets.write().unwrap().remove(ticket_id);
        Box::pin(future::ready(Ok(())))
    }

    fn list_all(&self) -> StorageFuture<'_, Vec<TicketRecord>> {
        if let Some(error) = self.injected_failure() {
            return Box::pin(future::ready(Err(error)));
        }

        let records = self.tickets.read().unwrap().values().cloned().collect();
        Box::pin(future::ready(Ok(records)))
    }
}
