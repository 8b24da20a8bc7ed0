//! Checkout Initiator: order in, hosted checkout session and Pending payment out.

use crate::environment::SagaEnvironment;
use crate::metrics::CheckoutMetrics;
use payment_saga_core::error::SagaError;
use payment_saga_core::gateway::{
    CreateSessionRequest, GatewayError, GatewayLineItem, SessionDetail, SessionMetadata,
};
use payment_saga_core::order::CheckoutRequest;
use payment_saga_core::payment::{
    NewPayment, PaymentId, PaymentMethod, PaymentRecord, SessionRef, TransactionId, to_cents,
};
use serde::Serialize;

/// Checkout configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// Base URL of the customer-facing client, for redirects
    pub client_url: String,
    /// Lowercase ISO currency code
    pub currency: String,
    /// Delivery fee appended to every checkout, in minor units
    pub delivery_fee_cents: i64,
    /// Line-item label for the delivery fee
    pub delivery_fee_label: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            client_url: "http://localhost:3000".to_string(),
            currency: "usd".to_string(),
            delivery_fee_cents: 500,
            delivery_fee_label: "Delivery Fee".to_string(),
        }
    }
}

impl CheckoutConfig {
    /// Set the client base URL.
    #[must_use]
    pub fn with_client_url(mut self, url: impl Into<String>) -> Self {
        self.client_url = url.into();
        self
    }

    /// Set the currency.
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into().to_lowercase();
        self
    }

    /// Set the delivery fee in minor units.
    #[must_use]
    pub const fn with_delivery_fee_cents(mut self, cents: i64) -> Self {
        self.delivery_fee_cents = cents;
        self
    }

    fn success_url(&self) -> String {
        format!(
            "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.client_url.trim_end_matches('/')
        )
    }

    fn cancel_url(&self, order_id: &str) -> String {
        format!(
            "{}/payment/cancel?order_id={order_id}",
            self.client_url.trim_end_matches('/')
        )
    }
}

/// Result of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    /// Gateway session reference
    pub session_ref: SessionRef,
    /// Pending Payment Record
    pub payment_id: PaymentId,
    /// Hosted checkout page to redirect the customer to
    pub url: String,
}

/// Creates checkout sessions.
#[derive(Clone, Debug)]
pub struct CheckoutInitiator {
    env: SagaEnvironment,
    config: CheckoutConfig,
}

impl CheckoutInitiator {
    /// Create an initiator.
    #[must_use]
    pub const fn new(env: SagaEnvironment, config: CheckoutConfig) -> Self {
        Self { env, config }
    }

    /// Validate `request`, open a gateway checkout session and persist a
    /// Pending payment correlated to it.
    ///
    /// Nothing is persisted unless the gateway call succeeds.
    ///
    /// # Errors
    ///
    /// - [`SagaError::Validation`]: missing field or non-positive amount
    /// - [`SagaError::Gateway`]: the gateway refused or was unreachable
    /// - [`SagaError::Storage`]: the session was created but the record could not be written
    pub async fn start(&self, request: &CheckoutRequest) -> Result<CheckoutOutcome, SagaError> {
        if let Err(e) = request.validate() {
            CheckoutMetrics::record_rejected("validation");
            return Err(e);
        }

        let order_id = request.order_id();
        let mut line_items: Vec<GatewayLineItem> = request
            .items
            .iter()
            .map(|item| GatewayLineItem {
                name: item.name.trim().to_string(),
                unit_amount_cents: to_cents(item.price),
                quantity: item.quantity,
            })
            .collect();
        if self.config.delivery_fee_cents > 0 {
            line_items.push(GatewayLineItem {
                name: self.config.delivery_fee_label.clone(),
                unit_amount_cents: self.config.delivery_fee_cents,
                quantity: 1,
            });
        }

        let amount_cents = line_items.iter().fold(0i64, |sum, item| {
            sum.saturating_add(item.unit_amount_cents.saturating_mul(item.quantity))
        });
        let declared_cents = to_cents(request.total_amount);
        if amount_cents != declared_cents {
            tracing::warn!(
                order_id = %order_id,
                charged_cents = amount_cents,
                declared_cents,
                "Declared order total differs from line items plus delivery fee"
            );
        }

        let session = self
            .env
            .gateway
            .create_session(CreateSessionRequest {
                metadata: SessionMetadata {
                    order_id: order_id.clone(),
                    customer_id: request.customer_id(),
                    restaurant_id: request.restaurant_id(),
                },
                line_items,
                currency: self.config.currency.clone(),
                success_url: self.config.success_url(),
                cancel_url: self.config.cancel_url(order_id.as_str()),
            })
            .await
            .map_err(|e| {
                CheckoutMetrics::record_rejected("gateway");
                tracing::error!(order_id = %order_id, error = %e, "Gateway refused checkout session");
                SagaError::Gateway(e.to_string())
            })?;

        let record = PaymentRecord::pending(
            NewPayment {
                id: PaymentId::new(self.env.ids.payment_id()),
                order_id: order_id.clone(),
                customer_id: request.customer_id(),
                restaurant_id: request.restaurant_id(),
                amount_cents,
                currency: self.config.currency.clone(),
                payment_method: PaymentMethod::Card,
                transaction_id: TransactionId::new(self.env.ids.transaction_id()),
                gateway_session_ref: Some(session.session_ref.clone()),
            },
            self.env.clock.now(),
        );

        let record = self.env.store.insert(record).await.map_err(|e| {
            CheckoutMetrics::record_rejected("storage");
            tracing::error!(
                order_id = %order_id,
                session_ref = %session.session_ref,
                error = %e,
                "Checkout session created but payment record not persisted"
            );
            SagaError::from(e)
        })?;

        CheckoutMetrics::record_created();
        tracing::info!(
            payment_id = %record.id,
            order_id = %order_id,
            session_ref = %session.session_ref,
            amount_cents,
            "Checkout session created"
        );

        Ok(CheckoutOutcome {
            session_ref: session.session_ref,
            payment_id: record.id,
            url: session.url,
        })
    }

    /// Gateway-side status of a checkout session.
    ///
    /// # Errors
    ///
    /// - [`SagaError::NotFound`]: the gateway does not know the session
    /// - [`SagaError::Gateway`]: the lookup failed
    pub async fn session_status(&self, session_ref: &SessionRef) -> Result<SessionDetail, SagaError> {
        self.env
            .gateway
            .get_session(session_ref)
            .await
            .map_err(|e| match e {
                GatewayError::NotFound(_) => {
                    SagaError::NotFound(format!("checkout session {session_ref}"))
                }
                other => SagaError::Gateway(other.to_string()),
            })
    }
}
