//! Payment Record Store trait.
//!
//! The store is the source of truth for payment state. Its one concurrency
//! primitive is [`PaymentStore::transition`]: a conditional write that only
//! applies if the record still holds the transition's expected status. Two
//! concurrent callers racing on the same record see exactly one
//! [`CasOutcome::Applied`]; the other sees [`CasOutcome::Conflict`] with the
//! post-condition.
//!
//! # Implementations
//!
//! - `PostgresPaymentStore` (in `payment-saga-postgres`): `UPDATE ... WHERE status = $expected`
//! - `InMemoryPaymentStore` (in `payment-saga-testing`): mutex-guarded map
//!
//! # Example
//!
//! ```no_run
//! use payment_saga_core::store::{CasOutcome, PaymentStore, StoreError};
//! use payment_saga_core::payment::{PaymentId, Transition};
//! use chrono::Utc;
//!
//! async fn confirm<S: PaymentStore>(store: &S, id: &PaymentId) -> Result<bool, StoreError> {
//!     let outcome = store
//!         .transition(id, Transition::Succeed { payment_ref: None }, Utc::now())
//!         .await?;
//!     Ok(matches!(outcome, CasOutcome::Applied(_)))
//! }
//! ```

use crate::error::SagaError;
use crate::payment::{PaymentId, PaymentRecord, PaymentStatus, SessionRef, Transition};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique constraint violated (transaction id, session or payment reference).
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// Record not found.
    #[error("Payment not found: {0}")]
    NotFound(PaymentId),

    /// Database connection or query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(format!("payment {id}")),
            StoreError::Duplicate(msg) | StoreError::DatabaseError(msg) => Self::Storage(msg),
        }
    }
}

/// Result of a conditional write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write applied; the record as stored afterwards.
    Applied(PaymentRecord),
    /// The record no longer matched the expected state; the record as found.
    Conflict(PaymentRecord),
}

impl CasOutcome {
    /// The record after the attempt, whichever way it went.
    #[must_use]
    pub const fn record(&self) -> &PaymentRecord {
        match self {
            Self::Applied(record) | Self::Conflict(record) => record,
        }
    }

    /// Whether this caller won.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Persistence for Payment Records.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` and must not rely on in-process
/// locks for transition atomicity: several process instances may serve
/// webhook deliveries for the same record.
///
/// # Dyn Compatibility
///
/// Explicit `Pin<Box<dyn Future>>` returns allow `Arc<dyn PaymentStore>`.
pub trait PaymentStore: Send + Sync {
    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// - `Duplicate`: id, transaction id or session reference already used
    /// - `DatabaseError`: query failed
    fn insert(
        &self,
        record: PaymentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentRecord, StoreError>> + Send + '_>>;

    /// Load a record by id.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query failed. A missing record is `Ok(None)`.
    fn get(
        &self,
        id: &PaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentRecord>, StoreError>> + Send + '_>>;

    /// Load a record by gateway session reference.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query failed. A missing record is `Ok(None)`.
    fn find_by_session(
        &self,
        session_ref: &SessionRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentRecord>, StoreError>> + Send + '_>>;

    /// Conditionally apply `transition`.
    ///
    /// The write applies only if the record's status equals
    /// [`Transition::expected_status`] and [`PaymentRecord::apply`] accepts it.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no record with this id
    /// - `DatabaseError`: query failed
    fn transition(
        &self,
        id: &PaymentId,
        transition: Transition,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome, StoreError>> + Send + '_>>;

    /// Records in `status` updated at or after `since`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query failed.
    fn list_by_status(
        &self,
        status: PaymentStatus,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaymentRecord>, StoreError>> + Send + '_>>;

    /// Succeeded records updated at or after `since` that have no
    /// confirmation job yet, oldest first.
    ///
    /// Records that already have a job never count against `limit`, so a
    /// payment left without one is found no matter how many confirmed
    /// payments share the window.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query failed.
    fn list_unconfirmed(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaymentRecord>, StoreError>> + Send + '_>>;

    /// Cheap connectivity check for readiness.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the backend is unreachable.
    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}
