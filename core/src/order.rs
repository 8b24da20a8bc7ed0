//! Order-side types and the Order Service boundary.
//!
//! Orders are owned by an external service. The saga only reads the checkout
//! input and pushes one status update (Confirmed / payment completed) after
//! payment success.

use crate::error::SagaError;
use crate::payment::{CustomerId, OrderId, RestaurantId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// One purchasable line of an order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItem {
    /// Display name
    pub name: String,
    /// Unit price in major units
    pub price: f64,
    /// Quantity
    pub quantity: i64,
}

/// Input to the Checkout Initiator.
///
/// Missing JSON fields deserialize to empty values so that validation, not
/// decoding, reports what is wrong.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Order being paid for
    pub order_id: String,
    /// Paying customer
    pub customer_id: String,
    /// Restaurant fulfilling the order
    pub restaurant_id: String,
    /// Ordered items
    pub items: Vec<LineItem>,
    /// Declared total in major units
    pub total_amount: f64,
    /// Delivery address
    pub delivery_address: String,
    /// Contact phone
    pub contact_phone: String,
}

impl CheckoutRequest {
    /// Check required fields and amounts.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), SagaError> {
        let required = [
            ("orderId", &self.order_id),
            ("customerId", &self.customer_id),
            ("restaurantId", &self.restaurant_id),
            ("deliveryAddress", &self.delivery_address),
            ("contactPhone", &self.contact_phone),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SagaError::Validation(format!("{field} is required")));
            }
        }

        if self.items.is_empty() {
            return Err(SagaError::Validation("items must not be empty".to_string()));
        }
        if !(self.total_amount.is_finite() && self.total_amount > 0.0) {
            return Err(SagaError::Validation("totalAmount must be greater than 0".to_string()));
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.name.trim().is_empty() {
                return Err(SagaError::Validation(format!("items[{index}].name is required")));
            }
            if item.quantity <= 0 {
                return Err(SagaError::Validation(format!(
                    "items[{index}].quantity must be positive"
                )));
            }
            if !(item.price.is_finite() && item.price > 0.0) {
                return Err(SagaError::Validation(format!(
                    "items[{index}].price must be positive"
                )));
            }
        }
        Ok(())
    }

    /// Typed order id.
    #[must_use]
    pub fn order_id(&self) -> OrderId {
        OrderId::new(self.order_id.trim())
    }

    /// Typed customer id.
    #[must_use]
    pub fn customer_id(&self) -> CustomerId {
        CustomerId::new(self.customer_id.trim())
    }

    /// Typed restaurant id.
    #[must_use]
    pub fn restaurant_id(&self) -> RestaurantId {
        RestaurantId::new(self.restaurant_id.trim())
    }
}

/// Order lifecycle status (owned by the Order Service).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created, awaiting payment
    Pending,
    /// Payment confirmed by the saga
    Confirmed,
    /// Restaurant is preparing
    Preparing,
    /// Out for delivery
    OnTheWay,
    /// Delivered
    Delivered,
    /// Cancelled
    Cancelled,
}

impl OrderStatus {
    /// Orders can be cancelled until preparation begins.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

/// Payment status as tracked on the order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentStatus {
    /// Not yet paid
    Pending,
    /// Paid
    Completed,
}

/// Body of the Order Service status update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusUpdate {
    /// New order status
    pub status: OrderStatus,
    /// New payment status
    pub payment_status: OrderPaymentStatus,
}

impl OrderStatusUpdate {
    /// The update sent after payment success.
    #[must_use]
    pub const fn payment_confirmed() -> Self {
        Self {
            status: OrderStatus::Confirmed,
            payment_status: OrderPaymentStatus::Completed,
        }
    }
}

/// Boundary into the external Order Service.
///
/// Implementations must treat every failure (transport or non-2xx) as
/// [`SagaError::DownstreamSync`].
pub trait OrderService: Send + Sync {
    /// Apply a status update to an order.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::DownstreamSync`] if the Order Service is unreachable
    /// or rejects the update.
    fn update_status(
        &self,
        order_id: &OrderId,
        update: OrderStatusUpdate,
    ) -> Pin<Box<dyn Future<Output = Result<(), SagaError>> + Send + '_>>;
}
