//! End-to-end saga scenarios against in-memory boundaries.
//!
//! Covers checkout → webhook → confirmation → refund, duplicate and
//! concurrent deliveries, signature rejection, and recovery of the order
//! projection after Order Service outages and crashes.

#![allow(clippy::unwrap_used)]

use payment_saga_core::confirmation::ConfirmationStatus;
use payment_saga_core::error::SagaError;
use payment_saga_core::order::OrderStatusUpdate;
use payment_saga_core::payment::{OrderId, PaymentRef, PaymentStatus, Transition};
use payment_saga_core::store::PaymentStore;
use payment_saga_runtime::{
    CheckoutConfig, CheckoutInitiator, ConfirmationAttempt, ConfirmationConfig,
    ConfirmationWorker, ReconcilerConfig, RefundCoordinator, SagaEnvironment, WebhookOutcome,
    WebhookReconciler,
};
use payment_saga_testing::fixtures::{checkout_request, checkout_request_for};
use payment_saga_testing::{
    InMemoryConfirmationQueue, InMemoryPaymentStore, ManualClock, MockGateway, MockOrderService,
    SequentialIdGenerator, init_tracing, test_epoch,
};
use std::sync::Arc;

const SECRET: &str = "whsec_scenario";

struct Saga {
    store: InMemoryPaymentStore,
    queue: InMemoryConfirmationQueue,
    gateway: MockGateway,
    orders: MockOrderService,
    clock: ManualClock,
    checkout: CheckoutInitiator,
    webhooks: WebhookReconciler,
    worker: ConfirmationWorker,
    refunds: RefundCoordinator,
}

impl Saga {
    fn new() -> Self {
        Self::with_store(InMemoryPaymentStore::new())
    }

    fn with_store(store: InMemoryPaymentStore) -> Self {
        init_tracing();
        let queue = InMemoryConfirmationQueue::new();
        let store = store.with_confirmations(&queue);
        let gateway = MockGateway::new();
        let orders = MockOrderService::new();
        let clock = ManualClock::new(test_epoch());
        let env = SagaEnvironment::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            Arc::new(gateway.clone()),
            Arc::new(orders.clone()),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_ids(Arc::new(SequentialIdGenerator::new()));

        let worker = ConfirmationWorker::new(env.clone(), ConfirmationConfig::default());
        Self {
            checkout: CheckoutInitiator::new(env.clone(), CheckoutConfig::default()),
            webhooks: WebhookReconciler::new(
                env.clone(),
                worker.clone(),
                ReconcilerConfig::new(SECRET),
            ),
            refunds: RefundCoordinator::new(env),
            worker,
            store,
            queue,
            gateway,
            orders,
            clock,
        }
    }

    async fn deliver(&self, body: &[u8]) -> Result<WebhookOutcome, SagaError> {
        let signature = MockGateway::sign(body, SECRET);
        self.webhooks.handle(body, Some(&signature)).await
    }
}

#[tokio::test]
async fn checkout_pay_confirm_refund() {
    let saga = Saga::new();

    let session = saga.checkout.start(&checkout_request()).await.unwrap();
    let payment = saga.store.snapshot(&session.payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);

    let completed =
        MockGateway::completed_event("evt_1", session.session_ref.as_str(), Some("R1"), true);
    let outcome = saga.deliver(&completed).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Reconciled {
            payment_id: session.payment_id.clone(),
            confirmation: ConfirmationAttempt::Confirmed,
        }
    );

    let payment = saga.store.snapshot(&session.payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert_eq!(payment.gateway_payment_ref, Some(PaymentRef::from("R1")));
    assert_eq!(
        saga.orders.calls(),
        vec![(OrderId::from("O1"), OrderStatusUpdate::payment_confirmed())]
    );

    // redelivery of the same event
    let outcome = saga.deliver(&completed).await.unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::AlreadyProcessed { status: PaymentStatus::Succeeded, .. }
    ));
    assert_eq!(saga.orders.call_count(), 1);

    let refunded = saga.refunds.refund(&session.payment_id).await.unwrap();
    assert_eq!(refunded.payment.status, PaymentStatus::Refunded);
    assert_eq!(saga.gateway.refunds(), vec![PaymentRef::from("R1")]);

    let err = saga.refunds.refund(&session.payment_id).await.unwrap_err();
    assert!(matches!(err, SagaError::InvalidState(_)));
    assert_eq!(saga.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn concurrent_deliveries_apply_once() {
    let saga = Saga::with_store(InMemoryPaymentStore::new().with_read_yield());
    let session = saga.checkout.start(&checkout_request()).await.unwrap();
    let body = MockGateway::completed_event("evt_1", session.session_ref.as_str(), Some("R1"), true);

    let (a, b) = tokio::join!(saga.deliver(&body), saga.deliver(&body));
    let outcomes = [a.unwrap(), b.unwrap()];

    let winners = outcomes
        .iter()
        .filter(|o| matches!(o, WebhookOutcome::Reconciled { .. }))
        .count();
    let losers = outcomes
        .iter()
        .filter(|o| matches!(o, WebhookOutcome::AlreadyProcessed { .. }))
        .count();
    assert_eq!((winners, losers), (1, 1));
    assert_eq!(saga.orders.call_count(), 1);
    assert_eq!(saga.queue.len(), 1);
}

#[tokio::test]
async fn forged_signature_changes_nothing() {
    let saga = Saga::new();
    let session = saga.checkout.start(&checkout_request()).await.unwrap();
    let body = MockGateway::completed_event("evt_1", session.session_ref.as_str(), Some("R1"), true);
    let forged = MockGateway::sign(&body, "not-the-secret");

    let err = saga.webhooks.handle(&body, Some(&forged)).await.unwrap_err();

    assert!(matches!(err, SagaError::Authentication(_)));
    assert_eq!(
        saga.store.snapshot(&session.payment_id).unwrap().status,
        PaymentStatus::Pending
    );
    assert!(saga.queue.is_empty());
    assert_eq!(saga.orders.call_count(), 0);
}

#[tokio::test]
async fn order_service_outage_converges_through_the_queue() {
    let saga = Saga::new();
    saga.orders.fail_next(3);
    let session = saga.checkout.start(&checkout_request()).await.unwrap();
    let body = MockGateway::completed_event("evt_1", session.session_ref.as_str(), Some("R1"), true);

    let outcome = saga.deliver(&body).await.unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::Reconciled {
            confirmation: ConfirmationAttempt::Rescheduled { attempts: 1, .. },
            ..
        }
    ));
    // payment truth is not rolled back
    assert_eq!(
        saga.store.snapshot(&session.payment_id).unwrap().status,
        PaymentStatus::Succeeded
    );

    for seconds in [1, 2, 4] {
        saga.clock.advance(chrono::Duration::seconds(seconds));
        assert_eq!(saga.worker.run_once().await.unwrap(), 1);
    }

    let job = saga.queue.job_for(&session.payment_id).unwrap();
    assert_eq!(job.status, ConfirmationStatus::Confirmed);
    assert_eq!(job.attempts, 4);
    assert_eq!(saga.orders.call_count(), 4);
}

#[tokio::test]
async fn sweep_heals_crash_between_transition_and_enqueue() {
    let saga = Saga::new();
    let session = saga.checkout.start(&checkout_request_for("O7")).await.unwrap();

    // the payment moved but the process died before enqueueing
    saga.store
        .transition(
            &session.payment_id,
            Transition::Succeed { payment_ref: Some("R7".into()) },
            test_epoch(),
        )
        .await
        .unwrap();
    assert!(saga.queue.is_empty());

    assert_eq!(saga.worker.sweep().await.unwrap(), 1);
    assert_eq!(saga.worker.run_once().await.unwrap(), 1);
    assert_eq!(saga.orders.calls()[0].0, OrderId::from("O7"));
}

#[tokio::test]
async fn refund_recovers_reference_missing_from_event() {
    let saga = Saga::new();
    let session = saga.checkout.start(&checkout_request()).await.unwrap();
    let body = MockGateway::async_succeeded_event("evt_1", session.session_ref.as_str(), None);
    saga.deliver(&body).await.unwrap();
    assert_eq!(
        saga.store.snapshot(&session.payment_id).unwrap().gateway_payment_ref,
        None
    );

    saga.gateway.settle_session(session.session_ref.as_str(), "R5");
    let refunded = saga.refunds.refund(&session.payment_id).await.unwrap();

    assert_eq!(refunded.payment.gateway_payment_ref, Some(PaymentRef::from("R5")));
    assert_eq!(saga.gateway.refunds(), vec![PaymentRef::from("R5")]);
}

#[tokio::test]
async fn failure_after_success_is_ignored() {
    let saga = Saga::new();
    let session = saga.checkout.start(&checkout_request()).await.unwrap();
    let completed =
        MockGateway::completed_event("evt_1", session.session_ref.as_str(), Some("R1"), true);
    let expired = MockGateway::expired_event("evt_2", session.session_ref.as_str());

    saga.deliver(&completed).await.unwrap();
    let outcome = saga.deliver(&expired).await.unwrap();

    assert!(matches!(outcome, WebhookOutcome::AlreadyProcessed { .. }));
    assert_eq!(
        saga.store.snapshot(&session.payment_id).unwrap().status,
        PaymentStatus::Succeeded
    );
}
