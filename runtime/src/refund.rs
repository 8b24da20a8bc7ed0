//! Refund Coordinator.
//!
//! Refunds are operator-initiated and only legal from Succeeded. A Succeeded
//! record may lack its gateway payment reference (the completion event did
//! not carry one); the coordinator recovers it from the checkout session and
//! persists it before refunding.

use crate::environment::SagaEnvironment;
use crate::metrics::RefundMetrics;
use payment_saga_core::error::SagaError;
use payment_saga_core::gateway::RefundResult;
use payment_saga_core::payment::{
    PaymentId, PaymentRecord, PaymentRef, PaymentStatus, RefundMetadata, Transition,
};
use payment_saga_core::store::CasOutcome;
use serde::Serialize;

/// A recorded refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundOutcome {
    /// The payment, now Refunded
    pub payment: PaymentRecord,
    /// What the gateway returned
    pub refund: RefundResult,
}

/// Issues refunds and records them on the Payment Record.
#[derive(Clone, Debug)]
pub struct RefundCoordinator {
    env: SagaEnvironment,
}

impl RefundCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub const fn new(env: SagaEnvironment) -> Self {
        Self { env }
    }

    /// Refund payment `id` in full.
    ///
    /// # Errors
    ///
    /// - [`SagaError::NotFound`]: no such payment
    /// - [`SagaError::InvalidState`]: the payment is not Succeeded; the gateway is not called
    /// - [`SagaError::Irrecoverable`]: the payment reference is missing and cannot be recovered
    /// - [`SagaError::Gateway`]: the gateway refused the refund
    /// - [`SagaError::Storage`]: a read or write failed
    pub async fn refund(&self, id: &PaymentId) -> Result<RefundOutcome, SagaError> {
        let Some(record) = self.env.store.get(id).await? else {
            RefundMetrics::record_rejected("not_found");
            return Err(SagaError::NotFound(format!("payment {id}")));
        };
        if record.status != PaymentStatus::Succeeded {
            RefundMetrics::record_rejected("invalid_state");
            return Err(SagaError::invalid_state(id, record.status, "refund"));
        }

        let payment_ref = match record.gateway_payment_ref.clone() {
            Some(payment_ref) => payment_ref,
            None => self.recover_payment_ref(&record).await?,
        };

        let refund = self
            .env
            .gateway
            .create_refund(&payment_ref)
            .await
            .map_err(|e| {
                RefundMetrics::record_rejected("gateway");
                tracing::error!(payment_id = %id, error = %e, "Gateway refused refund");
                SagaError::Gateway(e.to_string())
            })?;

        let now = self.env.clock.now();
        let transition = Transition::Refund {
            refund: RefundMetadata {
                refund_id: refund.refund_id.clone(),
                amount_cents: refund.amount_cents,
                status: refund.status.clone(),
                refunded_at: now,
            },
        };

        let outcome = self.env.store.transition(id, transition, now).await.map_err(|e| {
            tracing::error!(
                payment_id = %id,
                refund_id = %refund.refund_id,
                error = %e,
                "Refund issued at gateway but not recorded"
            );
            SagaError::from(e)
        })?;

        match outcome {
            CasOutcome::Applied(payment) => {
                RefundMetrics::record_issued();
                tracing::info!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    refund_id = %refund.refund_id,
                    amount_cents = refund.amount_cents,
                    "Payment refunded"
                );
                Ok(RefundOutcome { payment, refund })
            }
            CasOutcome::Conflict(current) => {
                tracing::error!(
                    payment_id = %id,
                    refund_id = %refund.refund_id,
                    status = %current.status,
                    "Refund issued at gateway but payment changed concurrently"
                );
                Err(SagaError::invalid_state(id, current.status, "record refund for"))
            }
        }
    }

    async fn recover_payment_ref(&self, record: &PaymentRecord) -> Result<PaymentRef, SagaError> {
        let irrecoverable = |why: String| {
            RefundMetrics::record_rejected("irrecoverable");
            tracing::error!(payment_id = %record.id, reason = %why, "Cannot recover payment reference");
            SagaError::Irrecoverable(format!(
                "payment {} has no gateway payment reference: {why}",
                record.id
            ))
        };

        let Some(session_ref) = &record.gateway_session_ref else {
            return Err(irrecoverable("no checkout session".to_string()));
        };
        let session = self
            .env
            .gateway
            .get_session(session_ref)
            .await
            .map_err(|e| irrecoverable(format!("session lookup failed: {e}")))?;
        let Some(payment_ref) = session.payment_ref else {
            return Err(irrecoverable(format!("session {session_ref} carries no payment")));
        };

        let outcome = self
            .env
            .store
            .transition(
                &record.id,
                Transition::FillPaymentRef {
                    payment_ref: payment_ref.clone(),
                },
                self.env.clock.now(),
            )
            .await?;

        match outcome {
            CasOutcome::Applied(_) => {
                tracing::info!(
                    payment_id = %record.id,
                    payment_ref = %payment_ref,
                    "Recovered gateway payment reference"
                );
                Ok(payment_ref)
            }
            CasOutcome::Conflict(current) => match current.gateway_payment_ref {
                Some(existing) if current.status == PaymentStatus::Succeeded => Ok(existing),
                _ => Err(SagaError::invalid_state(&record.id, current.status, "refund")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payment_saga_core::gateway::GatewayError;
    use payment_saga_core::payment::{NewPayment, PaymentMethod, SessionRef};
    use payment_saga_testing::{
        InMemoryConfirmationQueue, InMemoryPaymentStore, MockGateway, MockOrderService,
        test_epoch,
    };
    use std::sync::Arc;

    fn coordinator(store: &InMemoryPaymentStore, gateway: &MockGateway) -> RefundCoordinator {
        RefundCoordinator::new(SagaEnvironment::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryConfirmationQueue::new()),
            Arc::new(gateway.clone()),
            Arc::new(MockOrderService::new()),
        ))
    }

    fn record(status: PaymentStatus, session: Option<&str>, payment: Option<&str>) -> PaymentRecord {
        let mut record = PaymentRecord::pending(
            NewPayment {
                id: "P1".into(),
                order_id: "O1".into(),
                customer_id: "C1".into(),
                restaurant_id: "R1".into(),
                amount_cents: 2500,
                currency: "usd".to_string(),
                payment_method: PaymentMethod::Card,
                transaction_id: "T1".into(),
                gateway_session_ref: session.map(SessionRef::from),
            },
            test_epoch(),
        );
        record.status = status;
        record.gateway_payment_ref = payment.map(PaymentRef::from);
        record
    }

    #[tokio::test]
    async fn refunds_succeeded_payment() {
        let store = InMemoryPaymentStore::new();
        store.put(record(PaymentStatus::Succeeded, Some("S1"), Some("R1")));
        let gateway = MockGateway::new();

        let outcome = coordinator(&store, &gateway).refund(&"P1".into()).await.unwrap();

        assert_eq!(outcome.payment.status, PaymentStatus::Refunded);
        assert_eq!(outcome.payment.refund.unwrap().refund_id, outcome.refund.refund_id);
        assert_eq!(gateway.refunds(), vec![PaymentRef::from("R1")]);
    }

    #[tokio::test]
    async fn non_succeeded_payments_never_reach_gateway() {
        for status in [PaymentStatus::Pending, PaymentStatus::Failed, PaymentStatus::Refunded] {
            let store = InMemoryPaymentStore::new();
            store.put(record(status, Some("S1"), Some("R1")));
            let gateway = MockGateway::new();

            let err = coordinator(&store, &gateway).refund(&"P1".into()).await.unwrap_err();

            assert!(matches!(err, SagaError::InvalidState(_)), "{status}");
            assert!(gateway.refunds().is_empty());
        }
    }

    #[tokio::test]
    async fn missing_payment_is_not_found() {
        let store = InMemoryPaymentStore::new();
        let err = coordinator(&store, &MockGateway::new())
            .refund(&"nope".into())
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::NotFound(_)));
    }

    #[tokio::test]
    async fn recovers_missing_payment_ref_from_session() {
        let store = InMemoryPaymentStore::new();
        store.put(record(PaymentStatus::Succeeded, Some("S1"), None));
        let gateway = MockGateway::new();
        gateway.settle_session("S1", "R9");

        let outcome = coordinator(&store, &gateway).refund(&"P1".into()).await.unwrap();

        assert_eq!(outcome.payment.gateway_payment_ref, Some(PaymentRef::from("R9")));
        assert_eq!(gateway.refunds(), vec![PaymentRef::from("R9")]);
    }

    #[tokio::test]
    async fn failed_recovery_leaves_record_unchanged() {
        let store = InMemoryPaymentStore::new();
        let before = record(PaymentStatus::Succeeded, Some("S1"), None);
        store.put(before.clone());
        let gateway = MockGateway::new();
        gateway.fail_get_session(GatewayError::RequestFailed("timeout".into()));

        let err = coordinator(&store, &gateway).refund(&"P1".into()).await.unwrap_err();

        assert!(matches!(err, SagaError::Irrecoverable(_)));
        assert_eq!(store.snapshot(&"P1".into()).unwrap(), before);
        assert!(gateway.refunds().is_empty());
    }

    #[tokio::test]
    async fn missing_session_ref_is_irrecoverable() {
        let store = InMemoryPaymentStore::new();
        let before = record(PaymentStatus::Succeeded, None, None);
        store.put(before.clone());
        let gateway = MockGateway::new();

        let err = coordinator(&store, &gateway).refund(&"P1".into()).await.unwrap_err();

        assert!(matches!(err, SagaError::Irrecoverable(_)));
        assert_eq!(store.snapshot(&"P1".into()).unwrap(), before);
        assert!(gateway.refunds().is_empty());
        assert_eq!(gateway.session_lookups(), 0);
    }

    #[tokio::test]
    async fn session_without_payment_is_irrecoverable() {
        let store = InMemoryPaymentStore::new();
        let before = record(PaymentStatus::Succeeded, Some("S1"), None);
        store.put(before.clone());
        let gateway = MockGateway::new();
        gateway.expire_session("S1");

        let err = coordinator(&store, &gateway).refund(&"P1".into()).await.unwrap_err();

        assert!(matches!(err, SagaError::Irrecoverable(_)));
        assert_eq!(store.snapshot(&"P1".into()).unwrap(), before);
        assert!(gateway.refunds().is_empty());
        assert_eq!(gateway.session_lookups(), 1);
    }

    #[tokio::test]
    async fn gateway_refusal_keeps_payment_succeeded() {
        let store = InMemoryPaymentStore::new();
        store.put(record(PaymentStatus::Succeeded, Some("S1"), Some("R1")));
        let gateway = MockGateway::new();
        gateway.fail_refund(GatewayError::ApiError {
            status: 400,
            message: "charge already refunded".into(),
        });

        let err = coordinator(&store, &gateway).refund(&"P1".into()).await.unwrap_err();

        assert!(matches!(err, SagaError::Gateway(_)));
        assert_eq!(store.snapshot(&"P1".into()).unwrap().status, PaymentStatus::Succeeded);
    }
}
