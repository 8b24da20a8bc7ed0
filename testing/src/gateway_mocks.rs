//! Scriptable fakes for the outbound HTTP boundaries
//!
//! - [`MockGateway`]: in-process payment gateway with its own signature scheme
//!   and a compact JSON event format
//! - [`MockOrderService`]: records status updates and fails on demand

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use payment_saga_core::error::SagaError;
use payment_saga_core::gateway::{
    CheckoutSession, CreateSessionRequest, GatewayError, GatewayEvent, PaymentGateway,
    RefundResult, SessionDetail,
};
use payment_saga_core::order::{OrderService, OrderStatusUpdate};
use payment_saga_core::payment::{OrderId, PaymentRef, SessionRef};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct GatewayState {
    next_session: u64,
    next_refund: u64,
    sessions: HashMap<SessionRef, SessionDetail>,
    created: Vec<CreateSessionRequest>,
    refunds: Vec<PaymentRef>,
    session_lookups: u32,
    fail_create: Option<GatewayError>,
    fail_get: Option<GatewayError>,
    fail_refund: Option<GatewayError>,
    refund_amount_cents: i64,
    refund_status: String,
}

/// In-process payment gateway.
///
/// Sessions are numbered `cs_test_1`, `cs_test_2`, ... Webhook bodies use a
/// compact format produced by the `*_event` helpers and are signed with
/// [`MockGateway::sign`].
///
/// # Example
///
/// ```
/// use payment_saga_testing::MockGateway;
/// use payment_saga_core::gateway::PaymentGateway;
///
/// let gateway = MockGateway::new();
/// let body = MockGateway::completed_event("evt_1", "cs_test_1", Some("pi_1"), true);
/// let signature = MockGateway::sign(&body, "whsec_test");
/// assert!(gateway.verify_signature(&body, &signature, "whsec_test"));
/// assert!(!gateway.verify_signature(&body, &signature, "other"));
/// ```
#[derive(Clone, Debug)]
pub struct MockGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Gateway that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState {
                refund_amount_cents: 2500,
                refund_status: "succeeded".to_string(),
                ..GatewayState::default()
            })),
        }
    }

    /// Fail every `create_session` call with `error`.
    pub fn fail_create_session(&self, error: GatewayError) {
        self.state.lock().unwrap().fail_create = Some(error);
    }

    /// Fail every `get_session` call with `error`.
    pub fn fail_get_session(&self, error: GatewayError) {
        self.state.lock().unwrap().fail_get = Some(error);
    }

    /// Fail every `create_refund` call with `error`.
    pub fn fail_refund(&self, error: GatewayError) {
        self.state.lock().unwrap().fail_refund = Some(error);
    }

    /// Amount and status reported by refunds.
    pub fn set_refund_result(&self, amount_cents: i64, status: &str) {
        let mut state = self.state.lock().unwrap();
        state.refund_amount_cents = amount_cents;
        status.clone_into(&mut state.refund_status);
    }

    /// Mark a session paid with `payment_ref`, as the provider would after settlement.
    pub fn settle_session(&self, session_ref: &str, payment_ref: &str) {
        let mut state = self.state.lock().unwrap();
        let session_ref = SessionRef::from(session_ref);
        let detail = state
            .sessions
            .entry(session_ref.clone())
            .or_insert_with(|| SessionDetail {
                session_ref,
                status: None,
                payment_status: None,
                payment_ref: None,
            });
        detail.status = Some("complete".to_string());
        detail.payment_status = Some("paid".to_string());
        detail.payment_ref = Some(PaymentRef::from(payment_ref));
    }

    /// Register an unpaid session, as the provider reports one that expired.
    pub fn expire_session(&self, session_ref: &str) {
        let session_ref = SessionRef::from(session_ref);
        self.state.lock().unwrap().sessions.insert(
            session_ref.clone(),
            SessionDetail {
                session_ref,
                status: Some("expired".to_string()),
                payment_status: Some("unpaid".to_string()),
                payment_ref: None,
            },
        );
    }

    /// Session requests received so far.
    #[must_use]
    pub fn created_sessions(&self) -> Vec<CreateSessionRequest> {
        self.state.lock().unwrap().created.clone()
    }

    /// Charges refunded so far.
    #[must_use]
    pub fn refunds(&self) -> Vec<PaymentRef> {
        self.state.lock().unwrap().refunds.clone()
    }

    /// Number of `get_session` calls.
    #[must_use]
    pub fn session_lookups(&self) -> u32 {
        self.state.lock().unwrap().session_lookups
    }

    /// Signature the mock accepts for `payload` under `secret`.
    #[must_use]
    pub fn sign(payload: &[u8], secret: &str) -> String {
        let mut hasher = DefaultHasher::new();
        secret.hash(&mut hasher);
        payload.hash(&mut hasher);
        format!("mock={:016x}", hasher.finish())
    }

    /// `checkout.session.completed` body.
    #[must_use]
    pub fn completed_event(
        event_id: &str,
        session_ref: &str,
        payment_ref: Option<&str>,
        paid: bool,
    ) -> Vec<u8> {
        Self::event_body(
            event_id,
            "checkout.session.completed",
            json!({ "session": session_ref, "payment": payment_ref, "paid": paid }),
        )
    }

    /// `checkout.session.async_payment_succeeded` body.
    #[must_use]
    pub fn async_succeeded_event(
        event_id: &str,
        session_ref: &str,
        payment_ref: Option<&str>,
    ) -> Vec<u8> {
        Self::event_body(
            event_id,
            "checkout.session.async_payment_succeeded",
            json!({ "session": session_ref, "payment": payment_ref }),
        )
    }

    /// `checkout.session.async_payment_failed` body.
    #[must_use]
    pub fn async_failed_event(event_id: &str, session_ref: &str) -> Vec<u8> {
        Self::event_body(
            event_id,
            "checkout.session.async_payment_failed",
            json!({ "session": session_ref }),
        )
    }

    /// `checkout.session.expired` body.
    #[must_use]
    pub fn expired_event(event_id: &str, session_ref: &str) -> Vec<u8> {
        Self::event_body(event_id, "checkout.session.expired", json!({ "session": session_ref }))
    }

    /// Body for an event type the saga ignores.
    #[must_use]
    pub fn other_event(event_id: &str, event_type: &str) -> Vec<u8> {
        Self::event_body(event_id, event_type, json!({}))
    }

    fn event_body(event_id: &str, event_type: &str, data: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({ "id": event_id, "type": event_type, "data": data }))
            .unwrap()
    }
}

fn data_str(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn session_of(data: &Value) -> Result<SessionRef, GatewayError> {
    data_str(data, "session")
        .map(SessionRef::from)
        .ok_or_else(|| GatewayError::InvalidEvent("missing session".to_string()))
}

impl PaymentGateway for MockGateway {
    fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CheckoutSession, GatewayError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state.fail_create.clone() {
                return Err(error);
            }
            state.next_session += 1;
            let session_ref = SessionRef::new(format!("cs_test_{}", state.next_session));
            state.sessions.insert(
                session_ref.clone(),
                SessionDetail {
                    session_ref: session_ref.clone(),
                    status: Some("open".to_string()),
                    payment_status: Some("unpaid".to_string()),
                    payment_ref: None,
                },
            );
            state.created.push(request);
            Ok(CheckoutSession {
                url: format!("https://checkout.test/pay/{session_ref}"),
                session_ref,
            })
        })
    }

    fn get_session(
        &self,
        session_ref: &SessionRef,
    ) -> Pin<Box<dyn Future<Output = Result<SessionDetail, GatewayError>> + Send + '_>> {
        let session_ref = session_ref.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.session_lookups += 1;
            if let Some(error) = state.fail_get.clone() {
                return Err(error);
            }
            state
                .sessions
                .get(&session_ref)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(session_ref.to_string()))
        })
    }

    fn create_refund(
        &self,
        payment_ref: &PaymentRef,
    ) -> Pin<Box<dyn Future<Output = Result<RefundResult, GatewayError>> + Send + '_>> {
        let payment_ref = payment_ref.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = state.fail_refund.clone() {
                return Err(error);
            }
            state.next_refund += 1;
            state.refunds.push(payment_ref);
            Ok(RefundResult {
                refund_id: format!("re_test_{}", state.next_refund),
                amount_cents: state.refund_amount_cents,
                status: state.refund_status.clone(),
            })
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
        !secret.is_empty() && signature == Self::sign(payload, secret)
    }

    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent, GatewayError> {
        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::InvalidEvent(e.to_string()))?;
        let event_id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidEvent("missing id".to_string()))?
            .to_string();
        let event_type = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidEvent("missing type".to_string()))?;
        let data = body.get("data").cloned().unwrap_or(Value::Null);

        Ok(match event_type {
            "checkout.session.completed" => GatewayEvent::CheckoutCompleted {
                event_id,
                session_ref: session_of(&data)?,
                payment_ref: data_str(&data, "payment").map(PaymentRef::from),
                paid: data.get("paid").and_then(Value::as_bool).unwrap_or(false),
            },
            "checkout.session.async_payment_succeeded" => GatewayEvent::AsyncPaymentSucceeded {
                event_id,
                session_ref: session_of(&data)?,
                payment_ref: data_str(&data, "payment").map(PaymentRef::from),
            },
            "checkout.session.async_payment_failed" => GatewayEvent::AsyncPaymentFailed {
                event_id,
                session_ref: session_of(&data)?,
            },
            "checkout.session.expired" => GatewayEvent::SessionExpired {
                event_id,
                session_ref: session_of(&data)?,
            },
            other => GatewayEvent::Other {
                event_id,
                event_type: other.to_string(),
            },
        })
    }
}

/// Order Service fake.
///
/// Records every update it receives, including the ones it fails.
#[derive(Clone, Debug, Default)]
pub struct MockOrderService {
    calls: Arc<Mutex<Vec<(OrderId, OrderStatusUpdate)>>>,
    fail_next: Arc<AtomicU32>,
    always_fail: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockOrderService {
    /// Order Service that accepts every update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls, then succeed.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call until reset.
    pub fn set_failing(&self, failing: bool) {
        self.always_fail.store(failing, Ordering::SeqCst);
    }

    /// Sleep this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(OrderId, OrderStatusUpdate)> {
        self.calls.lock().unwrap().clone()
    }

    fn should_fail(&self) -> bool {
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl OrderService for MockOrderService {
    fn update_status(
        &self,
        order_id: &OrderId,
        update: OrderStatusUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<(), SagaError>> + Send + '_>> {
        let order_id = order_id.clone();
        Box::pin(async move {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push((order_id.clone(), update));
            if self.should_fail() {
                return Err(SagaError::DownstreamSync(format!(
                    "order service rejected update for {order_id}"
                )));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completed_event() {
        let gateway = MockGateway::new();
        let body = MockGateway::completed_event("evt_1", "cs_1", Some("pi_1"), true);
        let event = gateway.parse_event(&body).unwrap();
        assert_eq!(
            event,
            GatewayEvent::CheckoutCompleted {
                event_id: "evt_1".to_string(),
                session_ref: "cs_1".into(),
                payment_ref: Some("pi_1".into()),
                paid: true,
            }
        );
    }

    #[test]
    fn unknown_event_type_is_other() {
        let gateway = MockGateway::new();
        let event = gateway.parse_event(&MockGateway::other_event("evt_2", "invoice.paid")).unwrap();
        assert_eq!(event.kind(), "other");
    }

    #[test]
    fn tampered_body_fails_verification() {
        let gateway = MockGateway::new();
        let body = MockGateway::expired_event("evt_3", "cs_1");
        let signature = MockGateway::sign(&body, "whsec");
        let mut tampered = body.clone();
        tampered.push(b' ');
        assert!(!gateway.verify_signature(&tampered, &signature, "whsec"));
    }

    #[tokio::test]
    async fn order_service_fails_then_recovers() {
        let orders = MockOrderService::new();
        orders.fail_next(1);
        let order = OrderId::from("O1");
        assert!(orders.update_status(&order, OrderStatusUpdate::payment_confirmed()).await.is_err());
        assert!(orders.update_status(&order, OrderStatusUpdate::payment_confirmed()).await.is_ok());
        assert_eq!(orders.call_count(), 2);
    }
}
