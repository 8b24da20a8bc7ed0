//! Request fixtures shared by the saga test suites.

use payment_saga_core::order::{CheckoutRequest, LineItem};

/// A valid checkout for order `O1`: two pizzas at 10.00 plus a 5.00 delivery fee.
#[must_use]
pub fn checkout_request() -> CheckoutRequest {
    checkout_request_for("O1")
}

/// [`checkout_request`] for a different order id.
#[must_use]
pub fn checkout_request_for(order_id: &str) -> CheckoutRequest {
    CheckoutRequest {
        order_id: order_id.to_string(),
        customer_id: "C1".to_string(),
        restaurant_id: "R1".to_string(),
        items: vec![LineItem {
            name: "Margherita".to_string(),
            price: 10.0,
            quantity: 2,
        }],
        total_amount: 25.0,
        delivery_address: "1 Main St".to_string(),
        contact_phone: "555-0100".to_string(),
    }
}
