//! HTTP client for the external Order Service.

use payment_saga_core::error::SagaError;
use payment_saga_core::order::{OrderService, OrderStatusUpdate};
use payment_saga_core::payment::OrderId;
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Order Service reached over HTTP: `PUT {base_url}/orders/{orderId}`.
#[derive(Clone, Debug)]
pub struct HttpOrderService {
    client: Client,
    base_url: String,
}

impl HttpOrderService {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::DownstreamSync`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SagaError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SagaError::DownstreamSync(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn order_url(&self, order_id: &OrderId) -> String {
        format!("{}/orders/{order_id}", self.base_url)
    }

    async fn update_status_impl(
        &self,
        order_id: &OrderId,
        update: OrderStatusUpdate,
    ) -> Result<(), SagaError> {
        let response = self
            .client
            .put(self.order_url(order_id))
            .json(&update)
            .send()
            .await
            .map_err(|e| {
                SagaError::DownstreamSync(format!("order service unreachable: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(order_id = %order_id, status = status.as_u16(), "Order status updated");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            order_id = %order_id,
            status = status.as_u16(),
            body = %body,
            "Order service rejected status update"
        );
        Err(SagaError::DownstreamSync(format!(
            "order service returned {} for order {order_id}",
            status.as_u16()
        )))
    }
}

impl OrderService for HttpOrderService {
    fn update_status(
        &self,
        order_id: &OrderId,
        update: OrderStatusUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<(), SagaError>> + Send + '_>> {
        let order_id = order_id.clone();
        Box::pin(async move { self.update_status_impl(&order_id, update).await })
    }
}
