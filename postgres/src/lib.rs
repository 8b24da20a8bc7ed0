//! `PostgreSQL` storage for the order–payment saga.
//!
//! This crate provides the durable implementations of the two storage
//! boundaries from `payment-saga-core`:
//!
//! - [`PostgresPaymentStore`]: payment records with compare-and-swap status
//!   transitions (`UPDATE ... WHERE status = $expected`)
//! - [`PostgresConfirmationQueue`]: order-confirmation jobs claimed with
//!   `FOR UPDATE SKIP LOCKED` so several workers can share one table
//!
//! Uniqueness of transaction ids, gateway session references, and gateway
//! payment references is enforced by the schema; violations surface as
//! [`StoreError::Duplicate`](payment_saga_core::StoreError::Duplicate).
//!
//! # Example
//!
//! ```no_run
//! use payment_saga_postgres::{PostgresConfirmationQueue, PostgresPaymentStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresPaymentStore::connect("postgres://localhost/payments", 10).await?;
//! store.migrate().await?;
//! let queue = PostgresConfirmationQueue::new(store.pool().clone());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod confirmation_queue;
mod payment_store;

pub use confirmation_queue::PostgresConfirmationQueue;
pub use payment_store::PostgresPaymentStore;

use payment_saga_core::StoreError;

/// Map a sqlx error, turning unique violations into `Duplicate`.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(
            db.constraint()
                .map_or_else(|| db.message().to_string(), str::to_string),
        ),
        _ => StoreError::DatabaseError(err.to_string()),
    }
}

/// Clamp a caller-supplied limit to a SQL `LIMIT` value.
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
