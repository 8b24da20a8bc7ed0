//! Payment routes end to end over in-memory boundaries.

#![allow(clippy::unwrap_used)]

use axum::http::{
    HeaderName, HeaderValue, StatusCode,
    header::{ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, ORIGIN},
};
use axum_test::TestServer;
use payment_saga_core::gateway::GatewayError;
use payment_saga_core::payment::PaymentStatus;
use payment_saga_runtime::{
    CheckoutConfig, ConfirmationConfig, ConfirmationWorker, ReconcilerConfig, SagaEnvironment,
};
use payment_saga_testing::fixtures::checkout_request;
use payment_saga_testing::{
    InMemoryConfirmationQueue, InMemoryPaymentStore, MockGateway, MockOrderService,
    SequentialIdGenerator, test_clock,
};
use payment_saga_web::{AppState, STRIPE_SIGNATURE_HEADER, payment_router};
use serde_json::{Value, json};
use std::sync::Arc;

const SECRET: &str = "whsec_routes";
const TOKEN: &str = "test-token";
const CLIENT_ORIGIN: &str = "https://shop.example.com";

struct Harness {
    server: TestServer,
    store: InMemoryPaymentStore,
    gateway: MockGateway,
    orders: MockOrderService,
}

fn harness() -> Harness {
    let store = InMemoryPaymentStore::new();
    let gateway = MockGateway::new();
    let orders = MockOrderService::new();
    let env = SagaEnvironment::new(
        Arc::new(store.clone()),
        Arc::new(InMemoryConfirmationQueue::new()),
        Arc::new(gateway.clone()),
        Arc::new(orders.clone()),
    )
    .with_clock(Arc::new(test_clock()))
    .with_ids(Arc::new(SequentialIdGenerator::new()));

    let worker = ConfirmationWorker::new(env.clone(), ConfirmationConfig::default());
    let state = AppState::new(
        env,
        worker,
        CheckoutConfig::default(),
        ReconcilerConfig::new(SECRET),
    )
    .with_api_token(TOKEN)
    .with_allowed_origins([CLIENT_ORIGIN]);

    Harness {
        server: TestServer::new(payment_router(state)).unwrap(),
        store,
        gateway,
        orders,
    }
}

fn bearer() -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {TOKEN}")).unwrap()
}

fn signature(body: &[u8]) -> HeaderValue {
    HeaderValue::from_str(&MockGateway::sign(body, SECRET)).unwrap()
}

fn signature_header() -> HeaderName {
    HeaderName::from_static("stripe-signature")
}

#[tokio::test]
async fn checkout_returns_session_and_payment() {
    let h = harness();

    let response = h
        .server
        .post("/payments/checkout-sessions")
        .add_header(AUTHORIZATION, bearer())
        .json(&checkout_request())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["sessionId"], json!("cs_test_1"));
    assert_eq!(body["paymentId"], json!("P1"));
    assert_eq!(body["url"], json!("https://checkout.test/pay/cs_test_1"));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn checkout_requires_bearer_token() {
    let h = harness();

    let response = h
        .server
        .post("/payments/checkout-sessions")
        .json(&checkout_request())
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["success"], json!(false));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn checkout_validation_is_bad_request() {
    let h = harness();

    let response = h
        .server
        .post("/payments/checkout-sessions")
        .add_header(AUTHORIZATION, bearer())
        .json(&json!({ "customerId": "C1", "restaurantId": "R1", "items": [] }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    assert!(h.gateway.created_sessions().is_empty());
}

#[tokio::test]
async fn checkout_gateway_failure_is_bad_gateway() {
    let h = harness();
    h.gateway
        .fail_create_session(GatewayError::RequestFailed("connection refused".into()));

    let response = h
        .server
        .post("/payments/checkout-sessions")
        .add_header(AUTHORIZATION, bearer())
        .json(&checkout_request())
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn webhook_confirms_payment_and_order() {
    let h = harness();
    h.server
        .post("/payments/checkout-sessions")
        .add_header(AUTHORIZATION, bearer())
        .json(&checkout_request())
        .await;

    let body = MockGateway::completed_event("evt_1", "cs_test_1", Some("pi_1"), true);
    let response = h
        .server
        .post("/payments/webhook")
        .add_header(signature_header(), signature(&body))
        .bytes(body.into())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({ "received": true }));
    let payment = h.store.snapshot(&"P1".into()).unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert_eq!(h.orders.call_count(), 1);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let h = harness();
    h.server
        .post("/payments/checkout-sessions")
        .add_header(AUTHORIZATION, bearer())
        .json(&checkout_request())
        .await;

    let body = MockGateway::completed_event("evt_1", "cs_test_1", Some("pi_1"), true);
    let response = h
        .server
        .post("/payments/webhook")
        .add_header(signature_header(), HeaderValue::from_static("mock=forged"))
        .bytes(body.into())
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], json!("INVALID_SIGNATURE"));
    assert_eq!(
        h.store.snapshot(&"P1".into()).unwrap().status,
        PaymentStatus::Pending
    );
    assert_eq!(h.orders.call_count(), 0);
}

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let h = harness();
    let body = MockGateway::other_event("evt_1", "customer.created");

    let response = h.server.post("/payments/webhook").bytes(body.into()).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_storage_failure_asks_for_redelivery() {
    let h = harness();
    h.store.set_unavailable(true);

    let body = MockGateway::completed_event("evt_1", "cs_test_1", Some("pi_1"), true);
    let response = h
        .server
        .post("/payments/webhook")
        .add_header(signature_header(), signature(&body))
        .bytes(body.into())
        .await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn webhook_signature_header_name_is_stripe_signature() {
    assert_eq!(
        signature_header().as_str(),
        STRIPE_SIGNATURE_HEADER.to_ascii_lowercase()
    );
}

#[tokio::test]
async fn session_status_reflects_gateway() {
    let h = harness();
    h.server
        .post("/payments/checkout-sessions")
        .add_header(AUTHORIZATION, bearer())
        .json(&checkout_request())
        .await;
    h.gateway.settle_session("cs_test_1", "pi_1");

    let response = h
        .server
        .get("/payments/checkout-sessions/cs_test_1/status")
        .add_header(AUTHORIZATION, bearer())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["status"], json!("paid"));
}

#[tokio::test]
async fn refund_lifecycle() {
    let h = harness();
    h.server
        .post("/payments/checkout-sessions")
        .add_header(AUTHORIZATION, bearer())
        .json(&checkout_request())
        .await;

    let early = h
        .server
        .post("/payments/P1/refund")
        .add_header(AUTHORIZATION, bearer())
        .await;
    assert_eq!(early.status_code(), StatusCode::CONFLICT);
    assert!(h.gateway.refunds().is_empty());

    let body = MockGateway::completed_event("evt_1", "cs_test_1", Some("pi_1"), true);
    h.server
        .post("/payments/webhook")
        .add_header(signature_header(), signature(&body))
        .bytes(body.into())
        .await;

    let refunded = h
        .server
        .post("/payments/P1/refund")
        .add_header(AUTHORIZATION, bearer())
        .await;
    assert_eq!(refunded.status_code(), StatusCode::OK);
    let body: Value = refunded.json();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["payment"]["status"], json!("refunded"));
    assert_eq!(body["data"]["refund"]["amountCents"], json!(2500));

    let again = h
        .server
        .post("/payments/P1/refund")
        .add_header(AUTHORIZATION, bearer())
        .await;
    assert_eq!(again.status_code(), StatusCode::CONFLICT);
    assert_eq!(h.gateway.refunds().len(), 1);
}

#[tokio::test]
async fn refund_unknown_payment_is_not_found() {
    let h = harness();

    let response = h
        .server
        .post("/payments/P404/refund")
        .add_header(AUTHORIZATION, bearer())
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn readiness_follows_store() {
    let h = harness();

    assert_eq!(h.server.get("/health").await.status_code(), StatusCode::OK);
    assert_eq!(h.server.get("/health/ready").await.status_code(), StatusCode::OK);

    h.store.set_unavailable(true);
    let response = h.server.get("/health/ready").await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["status"], json!("unavailable"));
}

#[tokio::test]
async fn cors_allows_only_configured_origins() {
    let h = harness();

    let allowed = h
        .server
        .get("/health")
        .add_header(ORIGIN, HeaderValue::from_static(CLIENT_ORIGIN))
        .await;
    assert_eq!(
        allowed.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN),
        Some(&HeaderValue::from_static(CLIENT_ORIGIN))
    );

    let foreign = h
        .server
        .get("/health")
        .add_header(ORIGIN, HeaderValue::from_static("https://evil.example.net"))
        .await;
    assert_eq!(foreign.status_code(), StatusCode::OK);
    assert!(foreign.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
