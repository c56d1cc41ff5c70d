//! `PostgreSQL` ticket storage for ticketflow.
//!
//! Implements [`TicketRepository`] over a single `tickets` table:
//!
//! ```text
//! tickets(
//!     ticket_id      TEXT PRIMARY KEY,
//!     price_amount   NUMERIC(10,2) NOT NULL,
//!     price_currency CHAR(3)       NOT NULL,
//!     customer_email VARCHAR(255)  NOT NULL
//! )
//! ```
//!
//! Inserts use `ON CONFLICT DO NOTHING`, so the first write for a ticket id wins
//! and redelivered confirmations are harmless.
//!
//! # Example
//!
//! ```ignore
//! use ticketflow_postgres::PostgresTicketRepository;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = PostgresTicketRepository::new("postgres://localhost/tickets", 10).await?;
//!     repo.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use ticketflow_core::repository::{StorageError, StorageFuture, TicketRepository};
use ticketflow_core::ticket::TicketRecord;

const CREATE_TICKETS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS tickets (
        ticket_id TEXT PRIMARY KEY,
        price_amount NUMERIC(10, 2) NOT NULL,
        price_currency CHAR(3) NOT NULL,
        customer_email VARCHAR(255) NOT NULL
    )
";

fn storage_error(error: sqlx::Error) -> StorageError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StorageError::Connection(error.to_string()),
        other => StorageError::Query(other.to_string()),
    }
}

fn row_to_record(row: &PgRow) -> Result<TicketRecord, StorageError> {
    let invalid = |e: sqlx::Error| StorageError::InvalidRow(e.to_string());
    Ok(TicketRecord {
        ticket_id: row.try_get("ticket_id").map_err(invalid)?,
        price_amount: row.try_get("price_amount").map_err(invalid)?,
        price_currency: row.try_get("price_currency").map_err(invalid)?,
        customer_email: row.try_get("customer_email").map_err(invalid)?,
    })
}

/// [`TicketRepository`] backed by a `PostgreSQL` connection pool.
#[derive(Clone, Debug)]
pub struct PostgresTicketRepository {
    pool: PgPool,
}

impl PostgresTicketRepository {
    /// Connect to the database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the pool cannot be created.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `tickets` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the statement fails.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_TICKETS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        tracing::debug!("tickets table ready");
        Ok(())
    }
}

impl TicketRepository for PostgresTicketRepository {
    fn put(&self, record: &TicketRecord) -> StorageFuture<'_, ()> {
        let record = record.clone();
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO tickets (ticket_id, price_amount, price_currency, customer_email)
                VALUES ($1, $2::FLOAT8::NUMERIC(10, 2), $3, $4)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(&record.ticket_id)
            .bind(record.price_amount)
            .bind(&record.price_currency)
            .bind(&record.customer_email)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

            tracing::debug!(
                ticket_id = %record.ticket_id,
                inserted = result.rows_affected() == 1,
                "Ticket stored"
            );
            Ok(())
        })
    }

    fn delete(&self, ticket_id: &str) -> StorageFuture<'_, ()> {
        let ticket_id = ticket_id.to_string();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM tickets WHERE ticket_id = $1")
                .bind(&ticket_id)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;

            tracing::debug!(
                ticket_id = %ticket_id,
                removed = result.rows_affected(),
                "Ticket removed"
            );
            Ok(())
        })
    }

    fn list_all(&self) -> StorageFuture<'_, Vec<TicketRecord>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT ticket_id, price_amount::FLOAT8 AS price_amount, price_currency, customer_email
                FROM tickets
                ORDER BY ticket_id
                ",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

            rows.iter().map(row_to_record).collect()
        })
    }
}
