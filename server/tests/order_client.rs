//! Order Service client against a stubbed HTTP server.

#![allow(clippy::unwrap_used)]

use payment_saga_core::error::SagaError;
use payment_saga_core::order::{OrderService, OrderStatusUpdate};
use payment_saga_core::payment::OrderId;
use payment_saga_server::HttpOrderService;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpOrderService {
    HttpOrderService::new(server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn confirms_order_with_put() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/orders/O1"))
        .and(body_json(json!({ "status": "Confirmed", "paymentStatus": "completed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .update_status(&OrderId::from("O1"), OrderStatusUpdate::payment_confirmed())
        .await
        .unwrap();
}

#[tokio::test]
async fn non_success_status_is_downstream_sync_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/orders/O1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let result = client(&server)
        .update_status(&OrderId::from("O1"), OrderStatusUpdate::payment_confirmed())
        .await;

    assert!(matches!(result, Err(SagaError::DownstreamSync(msg)) if msg.contains("503")));
}

#[tokio::test]
async fn unknown_order_is_downstream_sync_error() {
    let server = MockServer::start().await;

    let result = client(&server)
        .update_status(&OrderId::from("O404"), OrderStatusUpdate::payment_confirmed())
        .await;

    assert!(matches!(result, Err(SagaError::DownstreamSync(_))));
}

#[tokio::test]
async fn unreachable_service_is_downstream_sync_error() {
    let client = HttpOrderService::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();

    let result = client
        .update_status(&OrderId::from("O1"), OrderStatusUpdate::payment_confirmed())
        .await;

    assert!(matches!(result, Err(SagaError::DownstreamSync(_))));
}

#[tokio::test]
async fn slow_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = HttpOrderService::new(server.uri(), Duration::from_millis(100)).unwrap();
    let result = client
        .update_status(&OrderId::from("O1"), OrderStatusUpdate::payment_confirmed())
        .await;

    assert!(matches!(result, Err(SagaError::DownstreamSync(_))));
}
