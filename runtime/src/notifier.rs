//! Order Status Notifier: the one call the saga makes into the Order Service.

use payment_saga_core::error::SagaError;
use payment_saga_core::order::{OrderService, OrderStatusUpdate};
use payment_saga_core::payment::OrderId;
use std::sync::Arc;
use std::time::Duration;

/// Sets orders to Confirmed / payment completed, bounded by a timeout.
#[derive(Clone)]
pub struct OrderStatusNotifier {
    orders: Arc<dyn OrderService>,
    timeout: Duration,
}

impl OrderStatusNotifier {
    /// Wrap an Order Service client.
    #[must_use]
    pub fn new(orders: Arc<dyn OrderService>, timeout: Duration) -> Self {
        Self { orders, timeout }
    }

    /// Mark `order_id` Confirmed with payment completed.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::DownstreamSync`] if the Order Service fails or
    /// does not answer within the timeout.
    pub async fn confirm_order(&self, order_id: &OrderId) -> Result<(), SagaError> {
        let call = self
            .orders
            .update_status(order_id, OrderStatusUpdate::payment_confirmed());

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => {
                tracing::info!(order_id = %order_id, "Order confirmed");
                Ok(())
            }
            Ok(Err(e)) => Err(match e {
                SagaError::DownstreamSync(_) => e,
                other => SagaError::DownstreamSync(other.to_string()),
            }),
            Err(_) => Err(SagaError::DownstreamSync(format!(
                "order service did not answer within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

impl std::fmt::Debug for OrderStatusNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderStatusNotifier")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
