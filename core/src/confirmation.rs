//! Durable order-confirmation jobs.
//!
//! Phase 2 of the saga: once a payment is Succeeded, the order must
//! eventually be Confirmed. The winner of the payment transition enqueues a
//! job; the job is retried with backoff until the Order Service accepts the
//! update or the attempt budget runs out, at which point it is escalated.

use crate::payment::{OrderId, PaymentId};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Confirmation job identifier.
pub type JobId = i64;

/// Status of a confirmation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    /// Waiting for (another) delivery attempt
    Pending,
    /// Order Service accepted the update
    Confirmed,
    /// Attempt budget exhausted; needs an operator
    Escalated,
}

impl ConfirmationStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Escalated => "escalated",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "escalated" => Ok(Self::Escalated),
            _ => Err(StoreError::DatabaseError(format!(
                "Invalid confirmation status: {s}"
            ))),
        }
    }
}

/// One pending order confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationJob {
    /// Unique identifier for this job
    pub id: JobId,
    /// Succeeded payment that triggered it (unique)
    pub payment_id: PaymentId,
    /// Order to confirm
    pub order_id: OrderId,
    /// Delivery attempts made so far
    pub attempts: u32,
    /// Current status
    pub status: ConfirmationStatus,
    /// Earliest time a worker may claim the job
    pub next_attempt_at: DateTime<Utc>,
    /// Error from the most recent failed attempt
    pub last_error: Option<String>,
    /// When the job was enqueued
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Result of [`ConfirmationQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    /// The payment's job, new or existing
    pub job: ConfirmationJob,
    /// Whether this call created it
    pub created: bool,
}

/// Durable queue of confirmation jobs.
pub trait ConfirmationQueue: Send + Sync {
    /// Enqueue a job for `payment_id`, or return the existing one.
    ///
    /// A new job becomes claimable at `not_before`. An existing job is
    /// returned untouched with `created == false`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the write fails.
    fn enqueue(
        &self,
        payment_id: &PaymentId,
        order_id: &OrderId,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Enqueued, StoreError>> + Send + '_>>;

    /// Claim up to `limit` Pending jobs due at `now`.
    ///
    /// Claimed jobs have `next_attempt_at` moved to `lease_until` so other
    /// workers skip them while the attempt is in flight.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConfirmationJob>, StoreError>> + Send + '_>>;

    /// Mark a job Confirmed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the write fails.
    fn mark_confirmed(
        &self,
        id: JobId,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Record a failed attempt and schedule the next one.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the write fails.
    fn record_failure(
        &self,
        id: JobId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmationJob, StoreError>> + Send + '_>>;

    /// Record a final failed attempt and mark the job Escalated.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the write fails.
    fn escalate(
        &self,
        id: JobId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmationJob, StoreError>> + Send + '_>>;

    /// Load the job for a payment.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    fn find_by_payment(
        &self,
        payment_id: &PaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ConfirmationJob>, StoreError>> + Send + '_>>;

    /// List escalated jobs, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    fn list_escalated(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConfirmationJob>, StoreError>> + Send + '_>>;
}
