//! In-memory store testing utilities
//!
//! Provides fast, deterministic stand-ins for the persistence boundaries:
//! - [`InMemoryPaymentStore`]: HashMap-based Payment Record storage with the
//!   same compare-and-swap semantics as the database store
//! - [`InMemoryConfirmationQueue`]: Vec-based confirmation job queue

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use chrono::{DateTime, Utc};
use payment_saga_core::confirmation::{
    ConfirmationJob, ConfirmationQueue, ConfirmationStatus, Enqueued, JobId,
};
use payment_saga_core::payment::{
    OrderId, PaymentId, PaymentRecord, PaymentStatus, SessionRef, Transition,
};
use payment_saga_core::store::{CasOutcome, PaymentStore, StoreError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory Payment Record store.
///
/// Transitions run [`PaymentRecord::apply`] under a write lock, so two
/// racing callers observe exactly one `Applied`.
///
/// # Example
///
/// ```
/// use payment_saga_testing::InMemoryPaymentStore;
///
/// let store = InMemoryPaymentStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryPaymentStore {
    records: Arc<RwLock<HashMap<PaymentId, PaymentRecord>>>,
    unavailable: Arc<AtomicBool>,
    yield_on_read: bool,
    confirmations: Option<InMemoryConfirmationQueue>,
}

impl InMemoryPaymentStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Yield to the scheduler after every read.
    ///
    /// Concurrent callers driven by `tokio::join!` then interleave between
    /// their read and their conditional write, which is the race the
    /// compare-and-swap has to settle.
    #[must_use]
    pub fn with_read_yield(mut self) -> Self {
        self.yield_on_read = true;
        self
    }

    /// Consult `queue` when listing unconfirmed payments.
    ///
    /// Without a queue every Succeeded record counts as unconfirmed.
    #[must_use]
    pub fn with_confirmations(mut self, queue: &InMemoryConfirmationQueue) -> Self {
        self.confirmations = Some(queue.clone());
        self
    }

    /// Make every operation fail with `DatabaseError` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Snapshot of a record, bypassing the async trait.
    #[must_use]
    pub fn snapshot(&self, id: &PaymentId) -> Option<PaymentRecord> {
        self.records.read().unwrap().get(id).cloned()
    }

    /// All records, in no particular order.
    #[must_use]
    pub fn all(&self) -> Vec<PaymentRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }

    /// Seed a record directly (for arranging test state).
    pub fn put(&self, record: PaymentRecord) {
        self.records.write().unwrap().insert(record.id.clone(), record);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::DatabaseError("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    async fn after_read(&self) {
        if self.yield_on_read {
            tokio::task::yield_now().await;
        }
    }
}

impl PaymentStore for InMemoryPaymentStore {
    fn insert(
        &self,
        record: PaymentRecord,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentRecord, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let mut records = self.records.write().unwrap();
            if records.contains_key(&record.id) {
                return Err(StoreError::Duplicate(format!("payment id {}", record.id)));
            }
            for existing in records.values() {
                if existing.transaction_id == record.transaction_id {
                    return Err(StoreError::Duplicate(format!(
                        "transaction id {}",
                        record.transaction_id
                    )));
                }
                if record.gateway_session_ref.is_some()
                    && existing.gateway_session_ref == record.gateway_session_ref
                {
                    return Err(StoreError::Duplicate("gateway session reference".to_string()));
                }
            }
            records.insert(record.id.clone(), record.clone());
            Ok(record)
        })
    }

    fn get(
        &self,
        id: &PaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentRecord>, StoreError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move {
            self.check_available()?;
            let found = self.records.read().unwrap().get(&id).cloned();
            self.after_read().await;
            Ok(found)
        })
    }

    fn find_by_session(
        &self,
        session_ref: &SessionRef,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PaymentRecord>, StoreError>> + Send + '_>> {
        let session_ref = session_ref.clone();
        Box::pin(async move {
            self.check_available()?;
            let found = self
                .records
                .read()
                .unwrap()
                .values()
                .find(|r| r.gateway_session_ref.as_ref() == Some(&session_ref))
                .cloned();
            self.after_read().await;
            Ok(found)
        })
    }

    fn transition(
        &self,
        id: &PaymentId,
        transition: Transition,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome, StoreError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move {
            self.check_available()?;
            let mut records = self.records.write().unwrap();

            if let Transition::FillPaymentRef { payment_ref }
            | Transition::Succeed {
                payment_ref: Some(payment_ref),
            } = &transition
            {
                let taken = records
                    .values()
                    .any(|r| r.id != id && r.gateway_payment_ref.as_ref() == Some(payment_ref));
                if taken {
                    return Err(StoreError::Duplicate(format!(
                        "gateway payment reference {payment_ref}"
                    )));
                }
            }

            let current = records.get_mut(&id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if current.status != transition.expected_status() {
                return Ok(CasOutcome::Conflict(current.clone()));
            }
            let mut next = current.clone();
            if next.apply(&transition, at).is_err() {
                return Ok(CasOutcome::Conflict(current.clone()));
            }
            *current = next.clone();
            Ok(CasOutcome::Applied(next))
        })
    }

    fn list_by_status(
        &self,
        status: PaymentStatus,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaymentRecord>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let mut found: Vec<PaymentRecord> = self
                .records
                .read()
                .unwrap()
                .values()
                .filter(|r| r.status == status && r.updated_at >= since)
                .cloned()
                .collect();
            found.sort_by_key(|r| r.updated_at);
            found.truncate(limit);
            Ok(found)
        })
    }

    fn list_unconfirmed(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaymentRecord>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let has_job = |id: &PaymentId| {
                self.confirmations
                    .as_ref()
                    .is_some_and(|queue| queue.job_for(id).is_some())
            };
            let mut found: Vec<PaymentRecord> = self
                .records
                .read()
                .unwrap()
                .values()
                .filter(|r| r.status == PaymentStatus::Succeeded && r.updated_at >= since)
                .filter(|r| !has_job(&r.id))
                .cloned()
                .collect();
            found.sort_by_key(|r| r.updated_at);
            found.truncate(limit);
            Ok(found)
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move { self.check_available() })
    }
}

/// In-memory confirmation job queue.
///
/// One job per payment id, ids assigned sequentially from 1.
#[derive(Clone, Debug, Default)]
pub struct InMemoryConfirmationQueue {
    jobs: Arc<RwLock<Vec<ConfirmationJob>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryConfirmationQueue {
    /// Create a new empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `DatabaseError` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of jobs in any status
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.read().unwrap().is_empty()
    }

    /// Snapshot of all jobs
    #[must_use]
    pub fn jobs(&self) -> Vec<ConfirmationJob> {
        self.jobs.read().unwrap().clone()
    }

    /// Snapshot of the job for a payment
    #[must_use]
    pub fn job_for(&self, payment_id: &PaymentId) -> Option<ConfirmationJob> {
        self.jobs
            .read()
            .unwrap()
            .iter()
            .find(|j| &j.payment_id == payment_id)
            .cloned()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::DatabaseError("queue unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn update<F>(&self, id: JobId, f: F) -> Result<ConfirmationJob, StoreError>
    where
        F: FnOnce(&mut ConfirmationJob),
    {
        self.check_available()?;
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::DatabaseError(format!("confirmation job {id} not found")))?;
        f(job);
        Ok(job.clone())
    }
}

impl ConfirmationQueue for InMemoryConfirmationQueue {
    fn enqueue(
        &self,
        payment_id: &PaymentId,
        order_id: &OrderId,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Enqueued, StoreError>> + Send + '_>> {
        let payment_id = payment_id.clone();
        let order_id = order_id.clone();
        Box::pin(async move {
            self.check_available()?;
            let mut jobs = self.jobs.write().unwrap();
            if let Some(existing) = jobs.iter().find(|j| j.payment_id == payment_id) {
                return Ok(Enqueued {
                    job: existing.clone(),
                    created: false,
                });
            }
            let job = ConfirmationJob {
                id: JobId::try_from(jobs.len()).unwrap_or(JobId::MAX) + 1,
                payment_id,
                order_id,
                attempts: 0,
                status: ConfirmationStatus::Pending,
                next_attempt_at: not_before,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            jobs.push(job.clone());
            Ok(Enqueued { job, created: true })
        })
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConfirmationJob>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let mut jobs = self.jobs.write().unwrap();
            let mut due: Vec<&mut ConfirmationJob> = jobs
                .iter_mut()
                .filter(|j| j.status == ConfirmationStatus::Pending && j.next_attempt_at <= now)
                .collect();
            due.sort_by_key(|j| j.next_attempt_at);
            Ok(due
                .into_iter()
                .take(limit)
                .map(|job| {
                    job.next_attempt_at = lease_until;
                    job.clone()
                })
                .collect())
        })
    }

    fn mark_confirmed(
        &self,
        id: JobId,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.update(id, |job| {
                job.attempts += 1;
                job.status = ConfirmationStatus::Confirmed;
                job.last_error = None;
                job.updated_at = at;
            })
            .map(|_| ())
        })
    }

    fn record_failure(
        &self,
        id: JobId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmationJob, StoreError>> + Send + '_>> {
        let error = error.to_string();
        Box::pin(async move {
            self.update(id, |job| {
                job.attempts += 1;
                job.next_attempt_at = next_attempt_at;
                job.last_error = Some(error);
                job.updated_at = at;
            })
        })
    }

    fn escalate(
        &self,
        id: JobId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmationJob, StoreError>> + Send + '_>> {
        let error = error.to_string();
        Box::pin(async move {
            self.update(id, |job| {
                job.attempts += 1;
                job.status = ConfirmationStatus::Escalated;
                job.last_error = Some(error);
                job.updated_at = at;
            })
        })
    }

    fn find_by_payment(
        &self,
        payment_id: &PaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ConfirmationJob>, StoreError>> + Send + '_>> {
        let payment_id = payment_id.clone();
        Box::pin(async move {
            self.check_available()?;
            Ok(self.job_for(&payment_id))
        })
    }

    fn list_escalated(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConfirmationJob>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let mut escalated: Vec<ConfirmationJob> = self
                .jobs
                .read()
                .unwrap()
                .iter()
                .filter(|j| j.status == ConfirmationStatus::Escalated)
                .cloned()
                .collect();
            escalated.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            escalated.truncate(limit);
            Ok(escalated)
        })
    }
}
