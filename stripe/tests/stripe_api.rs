//! Stripe adapter against a stubbed API.

#![allow(clippy::unwrap_used)]

use payment_saga_core::PaymentGateway;
use payment_saga_core::gateway::{CreateSessionRequest, GatewayError, GatewayLineItem, SessionMetadata};
use payment_saga_core::payment::{PaymentRef, SessionRef};
use payment_saga_stripe::{StripeConfig, StripeGateway};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn gateway() -> (MockServer, StripeGateway) {
    let server = MockServer::start().await;
    let gateway =
        StripeGateway::new(StripeConfig::new("sk_test_123").with_api_base(server.uri())).unwrap();
    (server, gateway)
}

fn session_request() -> CreateSessionRequest {
    CreateSessionRequest {
        metadata: SessionMetadata {
            order_id: "O1".into(),
            customer_id: "C1".into(),
            restaurant_id: "R1".into(),
        },
        line_items: vec![GatewayLineItem {
            name: "Margherita".to_string(),
            unit_amount_cents: 1000,
            quantity: 2,
        }],
        currency: "usd".to_string(),
        success_url: "http://client/payment/success".to_string(),
        cancel_url: "http://client/payment/cancel?order_id=O1".to_string(),
    }
}

#[tokio::test]
async fn create_session_posts_form_with_bearer_key() {
    let (server, gateway) = gateway().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_string_contains("mode=payment"))
        .and(body_string_contains("metadata%5BorderId%5D=O1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_1",
            "object": "checkout.session",
            "url": "https://checkout.stripe.com/c/pay/cs_test_1",
            "status": "open",
            "payment_status": "unpaid",
            "payment_intent": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = gateway.create_session(session_request()).await.unwrap();

    assert_eq!(session.session_ref, SessionRef::from("cs_test_1"));
    assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_test_1");
}

#[tokio::test]
async fn get_session_reads_payment_intent() {
    let (server, gateway) = gateway().await;
    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_test_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_1",
            "status": "complete",
            "payment_status": "paid",
            "payment_intent": "pi_1"
        })))
        .mount(&server)
        .await;

    let detail = gateway.get_session(&"cs_test_1".into()).await.unwrap();

    assert_eq!(detail.payment_ref, Some(PaymentRef::from("pi_1")));
    assert_eq!(detail.payment_status.as_deref(), Some("paid"));
    assert_eq!(detail.status.as_deref(), Some("complete"));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (server, gateway) = gateway().await;
    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "message": "No such checkout.session", "code": "resource_missing" }
        })))
        .mount(&server)
        .await;

    let result = gateway.get_session(&"cs_missing".into()).await;

    assert!(matches!(result, Err(GatewayError::NotFound(_))));
}

#[tokio::test]
async fn create_refund_targets_payment_intent() {
    let (server, gateway) = gateway().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(body_string_contains("payment_intent=pi_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_1",
            "object": "refund",
            "amount": 2500,
            "status": "succeeded"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refund = gateway.create_refund(&"pi_1".into()).await.unwrap();

    assert_eq!(refund.refund_id, "re_1");
    assert_eq!(refund.amount_cents, 2500);
    assert_eq!(refund.status, "succeeded");
}

#[tokio::test]
async fn api_error_carries_stripe_message() {
    let (server, gateway) = gateway().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "Charge ch_1 has already been refunded.",
                "code": "charge_already_refunded"
            }
        })))
        .mount(&server)
        .await;

    let result = gateway.create_refund(&"pi_1".into()).await;

    assert_eq!(
        result,
        Err(GatewayError::ApiError {
            status: 400,
            message: "Charge ch_1 has already been refunded.".to_string(),
        })
    );
}

#[tokio::test]
async fn unreachable_api_is_request_failure() {
    let gateway =
        StripeGateway::new(StripeConfig::new("sk_test_123").with_api_base("http://127.0.0.1:1"))
            .unwrap();

    let result = gateway.get_session(&"cs_test_1".into()).await;

    assert!(matches!(result, Err(GatewayError::RequestFailed(_))));
}
