//! Confirmation Worker: drives phase 2 of the saga to convergence.
//!
//! A Succeeded payment must eventually show up on its order as Confirmed /
//! payment completed. The webhook reconciler hands each newly Succeeded
//! payment to [`ConfirmationWorker::confirm_now`], which persists a job before
//! making one inline attempt. Whatever the inline attempt does not finish is
//! picked up by [`ConfirmationWorker::run_once`], retried with exponential
//! backoff, and escalated once the attempt budget is spent.
//!
//! [`ConfirmationWorker::sweep`] closes the remaining gap: a process that
//! crashes between the payment transition and the enqueue leaves a Succeeded
//! payment without a job, and the sweep enqueues it.
//!
//! # Example
//!
//! ```rust,ignore
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let worker = ConfirmationWorker::new(env, ConfirmationConfig::default());
//! let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
//!
//! // later
//! shutdown_tx.send(true).ok();
//! handle.await?;
//! ```

use crate::environment::SagaEnvironment;
use crate::metrics::ConfirmationMetrics;
use crate::notifier::OrderStatusNotifier;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use payment_saga_core::confirmation::{ConfirmationJob, ConfirmationStatus};
use payment_saga_core::error::SagaError;
use payment_saga_core::payment::PaymentRecord;
use std::time::Duration;
use tokio::sync::watch;

/// Confirmation worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationConfig {
    /// Backoff schedule and attempt budget
    pub retry: RetryPolicy,
    /// Upper bound on a single Order Service call, inline or from the worker
    pub attempt_timeout: Duration,
    /// How long a claimed job is hidden from other workers
    pub lease: Duration,
    /// Pause between `run_once` passes
    pub poll_interval: Duration,
    /// Pause between sweeps
    pub sweep_interval: Duration,
    /// How far back the sweep looks for Succeeded payments
    pub sweep_horizon: Duration,
    /// Jobs claimed per pass, and payments examined per sweep
    pub batch_size: usize,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(5),
            lease: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
            sweep_horizon: Duration::from_secs(24 * 60 * 60),
            batch_size: 32,
        }
    }
}

impl ConfirmationConfig {
    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the claim lease.
    #[must_use]
    pub const fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the sweep look-back horizon.
    #[must_use]
    pub const fn with_sweep_horizon(mut self, horizon: Duration) -> Self {
        self.sweep_horizon = horizon;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// What one delivery attempt did to its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationAttempt {
    /// The Order Service accepted the update
    Confirmed,
    /// The attempt failed; the job will be retried
    Rescheduled {
        /// Attempts made so far
        attempts: u32,
        /// When the job becomes due again
        next_attempt_at: DateTime<Utc>,
    },
    /// The attempt failed and the budget is spent
    Escalated {
        /// Attempts made
        attempts: u32,
    },
    /// The job had already been confirmed or escalated
    AlreadySettled,
    /// A pending job already existed; the worker delivers it
    Queued,
    /// The queue could not be written; the worker or sweep will pick it up
    Deferred,
}

/// Delivers confirmation jobs to the Order Service.
#[derive(Clone, Debug)]
pub struct ConfirmationWorker {
    env: SagaEnvironment,
    notifier: OrderStatusNotifier,
    config: ConfirmationConfig,
}

impl ConfirmationWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(env: SagaEnvironment, config: ConfirmationConfig) -> Self {
        let notifier = OrderStatusNotifier::new(env.orders.clone(), config.attempt_timeout);
        Self {
            env,
            notifier,
            config,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ConfirmationConfig {
        &self.config
    }

    /// Enqueue a job for a newly Succeeded payment and attempt it once inline.
    ///
    /// The job is enqueued leased, so a concurrent worker leaves it alone
    /// while the inline attempt runs. Only the call that creates the job
    /// attempts it; a job that already existed belongs to the worker.
    /// Never fails: queue errors are logged and reported as
    /// [`ConfirmationAttempt::Deferred`].
    pub async fn confirm_now(&self, payment: &PaymentRecord) -> ConfirmationAttempt {
        let now = self.env.clock.now();
        let enqueued = match self
            .env
            .confirmations
            .enqueue(&payment.id, &payment.order_id, now, after(now, self.config.lease))
            .await
        {
            Ok(enqueued) => enqueued,
            Err(e) => {
                tracing::error!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    error = %e,
                    "Failed to enqueue order confirmation, leaving it to the sweep"
                );
                return ConfirmationAttempt::Deferred;
            }
        };

        if enqueued.job.status != ConfirmationStatus::Pending {
            return ConfirmationAttempt::AlreadySettled;
        }
        if !enqueued.created {
            tracing::debug!(
                job_id = enqueued.job.id,
                payment_id = %payment.id,
                "Confirmation job already queued, skipping inline attempt"
            );
            return ConfirmationAttempt::Queued;
        }
        self.attempt(enqueued.job).await
    }

    /// Claim due jobs and attempt each once.
    ///
    /// Returns the number of jobs attempted.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Storage`] if jobs cannot be claimed.
    pub async fn run_once(&self) -> Result<usize, SagaError> {
        let now = self.env.clock.now();
        let jobs = self
            .env
            .confirmations
            .claim_due(now, after(now, self.config.lease), self.config.batch_size)
            .await?;

        let count = jobs.len();
        for job in jobs {
            self.attempt(job).await;
        }
        if count > 0 {
            tracing::debug!(count, "Confirmation pass finished");
        }
        Ok(count)
    }

    /// Enqueue every recently Succeeded payment that has no job.
    ///
    /// Returns the number of payments enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Storage`] if payments or jobs cannot be read or written.
    pub async fn sweep(&self) -> Result<usize, SagaError> {
        let now = self.env.clock.now();
        let since = before(now, self.config.sweep_horizon);
        let payments = self
            .env
            .store
            .list_unconfirmed(since, self.config.batch_size)
            .await?;

        let mut healed = 0;
        for payment in payments {
            let enqueued = self
                .env
                .confirmations
                .enqueue(&payment.id, &payment.order_id, now, now)
                .await?;
            // a concurrent confirm_now may have won the race
            if !enqueued.created {
                continue;
            }
            healed += 1;
            ConfirmationMetrics::record_healed();
            tracing::warn!(
                payment_id = %payment.id,
                order_id = %payment.order_id,
                "Succeeded payment had no confirmation job, enqueued"
            );
        }
        Ok(healed)
    }

    /// Poll and sweep until `shutdown` flips to `true`.
    ///
    /// Errors from individual passes are logged and the loop continues.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            poll_ms = self.config.poll_interval.as_millis(),
            sweep_ms = self.config.sweep_interval.as_millis(),
            "Confirmation worker started"
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Confirmation pass failed");
                    }
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Confirmation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!("Confirmation worker stopped");
    }

    async fn attempt(&self, job: ConfirmationJob) -> ConfirmationAttempt {
        let result = self.notifier.confirm_order(&job.order_id).await;
        let now = self.env.clock.now();
        let queue = &self.env.confirmations;

        let outcome = match result {
            Ok(()) => queue
                .mark_confirmed(job.id, now)
                .await
                .map(|()| {
                    ConfirmationMetrics::record_delivered();
                    ConfirmationAttempt::Confirmed
                }),
            Err(e) => {
                let attempts = job.attempts + 1;
                let error = e.to_string();
                if self.config.retry.is_exhausted(attempts) {
                    queue.escalate(job.id, &error, now).await.map(|_| {
                        ConfirmationMetrics::record_escalated();
                        tracing::error!(
                            job_id = job.id,
                            payment_id = %job.payment_id,
                            order_id = %job.order_id,
                            attempts,
                            error = %error,
                            "Order confirmation escalated: payment succeeded but order was never confirmed"
                        );
                        ConfirmationAttempt::Escalated { attempts }
                    })
                } else {
                    let next_attempt_at = after(now, self.config.retry.delay_for_attempt(attempts));
                    queue
                        .record_failure(job.id, &error, next_attempt_at, now)
                        .await
                        .map(|_| {
                            ConfirmationMetrics::record_rescheduled();
                            tracing::warn!(
                                job_id = job.id,
                                payment_id = %job.payment_id,
                                order_id = %job.order_id,
                                attempts,
                                next_attempt_at = %next_attempt_at,
                                error = %error,
                                "Order confirmation failed, rescheduled"
                            );
                            ConfirmationAttempt::Rescheduled {
                                attempts,
                                next_attempt_at,
                            }
                        })
                }
            }
        };

        outcome.unwrap_or_else(|e| {
            tracing::error!(
                job_id = job.id,
                payment_id = %job.payment_id,
                error = %e,
                "Failed to record confirmation attempt; the lease will expire and the job retried"
            );
            ConfirmationAttempt::Deferred
        })
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn before(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use payment_saga_core::payment::{NewPayment, PaymentMethod, Transition};
    use payment_saga_core::store::PaymentStore;
    use payment_saga_testing::{
        InMemoryConfirmationQueue, InMemoryPaymentStore, ManualClock, MockGateway,
        MockOrderService, test_epoch,
    };
    use std::sync::Arc;

    struct Harness {
        store: InMemoryPaymentStore,
        queue: InMemoryConfirmationQueue,
        orders: MockOrderService,
        clock: ManualClock,
        worker: ConfirmationWorker,
    }

    fn harness(retry: RetryPolicy) -> Harness {
        let queue = InMemoryConfirmationQueue::new();
        let store = InMemoryPaymentStore::new().with_confirmations(&queue);
        let orders = MockOrderService::new();
        let clock = ManualClock::new(test_epoch());
        let env = SagaEnvironment::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            Arc::new(MockGateway::new()),
            Arc::new(orders.clone()),
        )
        .with_clock(Arc::new(clock.clone()));
        let worker = ConfirmationWorker::new(env, ConfirmationConfig::default().with_retry(retry));
        Harness {
            store,
            queue,
            orders,
            clock,
            worker,
        }
    }

    async fn succeeded_payment(store: &InMemoryPaymentStore, id: &str) -> PaymentRecord {
        succeeded_payment_at(store, id, test_epoch()).await
    }

    async fn succeeded_payment_at(
        store: &InMemoryPaymentStore,
        id: &str,
        at: DateTime<Utc>,
    ) -> PaymentRecord {
        let record = PaymentRecord::pending(
            NewPayment {
                id: id.into(),
                order_id: format!("order-{id}").into(),
                customer_id: "C1".into(),
                restaurant_id: "R1".into(),
                amount_cents: 2500,
                currency: "usd".to_string(),
                payment_method: PaymentMethod::Card,
                transaction_id: format!("txn-{id}").into(),
                gateway_session_ref: Some(format!("cs-{id}").into()),
            },
            test_epoch(),
        );
        store.insert(record).await.unwrap();
        store
            .transition(&id.into(), Transition::Succeed { payment_ref: None }, at)
            .await
            .unwrap()
            .record()
            .clone()
    }

    #[tokio::test]
    async fn inline_attempt_confirms_order() {
        let h = harness(RetryPolicy::default());
        let payment = succeeded_payment(&h.store, "P1").await;

        let attempt = h.worker.confirm_now(&payment).await;

        assert_eq!(attempt, ConfirmationAttempt::Confirmed);
        assert_eq!(h.orders.call_count(), 1);
        let job = h.queue.job_for(&payment.id).unwrap();
        assert_eq!(job.status, ConfirmationStatus::Confirmed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn failed_attempt_is_rescheduled_with_backoff() {
        let h = harness(RetryPolicy::default());
        let payment = succeeded_payment(&h.store, "P1").await;
        h.orders.fail_next(2);

        let first = h.worker.confirm_now(&payment).await;
        assert_eq!(
            first,
            ConfirmationAttempt::Rescheduled {
                attempts: 1,
                next_attempt_at: test_epoch() + chrono::Duration::seconds(1),
            }
        );

        // not yet due
        assert_eq!(h.worker.run_once().await.unwrap(), 0);

        h.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(h.worker.run_once().await.unwrap(), 1);
        let job = h.queue.job_for(&payment.id).unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.next_attempt_at, h.clock_now() + chrono::Duration::seconds(2));

        h.clock.advance(chrono::Duration::seconds(2));
        h.worker.run_once().await.unwrap();
        assert_eq!(h.queue.job_for(&payment.id).unwrap().status, ConfirmationStatus::Confirmed);
        assert_eq!(h.orders.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_job_is_escalated() {
        let h = harness(RetryPolicy::builder().max_attempts(2).build());
        let payment = succeeded_payment(&h.store, "P1").await;
        h.orders.set_failing(true);

        h.worker.confirm_now(&payment).await;
        h.clock.advance(chrono::Duration::seconds(1));
        h.worker.run_once().await.unwrap();

        let job = h.queue.job_for(&payment.id).unwrap();
        assert_eq!(job.status, ConfirmationStatus::Escalated);
        assert_eq!(job.attempts, 2);
        assert!(job.last_error.is_some());

        // escalated jobs are never claimed again
        h.clock.advance(chrono::Duration::hours(1));
        assert_eq!(h.worker.run_once().await.unwrap(), 0);
        assert_eq!(h.orders.call_count(), 2);
    }

    #[tokio::test]
    async fn sweep_enqueues_orphaned_payments_once() {
        let h = harness(RetryPolicy::default());
        let orphan = succeeded_payment(&h.store, "P1").await;

        assert_eq!(h.worker.sweep().await.unwrap(), 1);
        assert_eq!(h.worker.sweep().await.unwrap(), 0);

        h.worker.run_once().await.unwrap();
        assert_eq!(h.orders.calls()[0].0, orphan.order_id);
    }

    #[tokio::test]
    async fn sweep_finds_orphan_behind_a_full_batch_of_confirmed_payments() {
        let h = harness(RetryPolicy::default());
        assert!(h.worker.config().batch_size < 40);
        for n in 0..40 {
            let payment = succeeded_payment(&h.store, &format!("P{n}")).await;
            assert_eq!(h.worker.confirm_now(&payment).await, ConfirmationAttempt::Confirmed);
        }
        let orphan =
            succeeded_payment_at(&h.store, "late", test_epoch() + chrono::Duration::seconds(10))
                .await;
        h.clock.advance(chrono::Duration::seconds(10));

        assert_eq!(h.worker.sweep().await.unwrap(), 1);

        let job = h.queue.job_for(&orphan.id).unwrap();
        assert_eq!(job.status, ConfirmationStatus::Pending);
        assert_eq!(job.order_id, orphan.order_id);
        assert_eq!(h.queue.len(), 41);
    }

    #[tokio::test]
    async fn existing_job_is_left_to_the_worker() {
        let h = harness(RetryPolicy::default());
        let payment = succeeded_payment(&h.store, "P1").await;
        assert_eq!(h.worker.sweep().await.unwrap(), 1);

        assert_eq!(h.worker.confirm_now(&payment).await, ConfirmationAttempt::Queued);
        assert_eq!(h.orders.call_count(), 0);
        assert_eq!(h.queue.job_for(&payment.id).unwrap().attempts, 0);

        assert_eq!(h.worker.run_once().await.unwrap(), 1);
        assert_eq!(h.orders.call_count(), 1);
        assert_eq!(h.queue.job_for(&payment.id).unwrap().status, ConfirmationStatus::Confirmed);
    }

    #[tokio::test]
    async fn confirmed_job_reports_already_settled() {
        let h = harness(RetryPolicy::default());
        let payment = succeeded_payment(&h.store, "P1").await;
        h.worker.confirm_now(&payment).await;

        assert_eq!(h.worker.confirm_now(&payment).await, ConfirmationAttempt::AlreadySettled);
        assert_eq!(h.orders.call_count(), 1);
    }

    #[tokio::test]
    async fn queue_outage_defers_inline_attempt() {
        let h = harness(RetryPolicy::default());
        let payment = succeeded_payment(&h.store, "P1").await;
        h.queue.set_unavailable(true);

        assert_eq!(h.worker.confirm_now(&payment).await, ConfirmationAttempt::Deferred);
        assert_eq!(h.orders.call_count(), 0);

        h.queue.set_unavailable(false);
        assert_eq!(h.worker.sweep().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness(RetryPolicy::default());
        let (tx, rx) = watch::channel(false);
        let worker = h.worker.clone();
        let handle = tokio::spawn(async move { worker.run(rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    impl Harness {
        fn clock_now(&self) -> DateTime<Utc> {
            use payment_saga_core::environment::Clock;
            self.clock.now()
        }
    }
}
