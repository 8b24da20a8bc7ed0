//! Stripe Checkout client implementation

use crate::events;
use crate::signature;
use crate::types::{StripeErrorBody, StripeRefund, StripeSession};
use payment_saga_core::environment::{Clock, SystemClock};
use payment_saga_core::gateway::{
    CheckoutSession, CreateSessionRequest, GatewayError, GatewayEvent, PaymentGateway,
    RefundResult, SessionDetail,
};
use payment_saga_core::payment::{PaymentRef, SessionRef};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Stripe adapter configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_...`)
    pub secret_key: String,
    /// API base URL, without the `/v1` suffix
    pub api_base: String,
    /// Accepted age of a webhook signature timestamp
    pub signature_tolerance: Duration,
    /// Timeout for each API request
    pub request_timeout: Duration,
}

impl StripeConfig {
    /// Configuration for the live API with the given key.
    #[must_use]
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            api_base: "https://api.stripe.com".to_string(),
            signature_tolerance: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Point at a different API host (stubs, proxies).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the signature tolerance.
    #[must_use]
    pub const fn with_signature_tolerance(mut self, tolerance: Duration) -> Self {
        self.signature_tolerance = tolerance;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("signature_tolerance", &self.signature_tolerance)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Stripe Checkout gateway
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
    clock: Arc<dyn Clock>,
}

impl StripeGateway {
    /// Create a gateway.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` for signature timestamp checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.config.api_base)
    }

    async fn read<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, GatewayError> {
        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::ResponseParseFailed(e.to_string())),
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound(what.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<StripeErrorBody>(&body)
                    .ok()
                    .and_then(|b| b.error.message)
                    .unwrap_or(body);
                Err(GatewayError::ApiError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn create_session_impl(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let form = session_form(&request);
        let response = self
            .client
            .post(self.url("checkout/sessions"))
            .bearer_auth(&self.config.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        let session: StripeSession = Self::read(response, "checkout session").await?;
        let url = session.url.ok_or_else(|| {
            GatewayError::ResponseParseFailed("checkout session has no url".to_string())
        })?;
        tracing::debug!(session_ref = %session.id, order_id = %request.metadata.order_id, "Stripe session created");
        Ok(CheckoutSession {
            session_ref: SessionRef::from(session.id),
            url,
        })
    }

    async fn get_session_impl(&self, session_ref: &SessionRef) -> Result<SessionDetail, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("checkout/sessions/{session_ref}")))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        let session: StripeSession =
            Self::read(response, &format!("checkout session {session_ref}")).await?;
        Ok(SessionDetail {
            payment_ref: session.payment_intent_id().map(PaymentRef::from),
            session_ref: SessionRef::from(session.id),
            status: session.status,
            payment_status: session.payment_status,
        })
    }

    async fn create_refund_impl(&self, payment_ref: &PaymentRef) -> Result<RefundResult, GatewayError> {
        let response = self
            .client
            .post(self.url("refunds"))
            .bearer_auth(&self.config.secret_key)
            .form(&[("payment_intent", payment_ref.as_str())])
            .send()
            .await
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        let refund: StripeRefund = Self::read(response, &format!("payment {payment_ref}")).await?;
        Ok(RefundResult {
            refund_id: refund.id,
            amount_cents: refund.amount,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }
}

/// Form fields for `POST /v1/checkout/sessions`.
fn session_form(request: &CreateSessionRequest) -> Vec<(String, String)> {
    let metadata = &request.metadata;
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("client_reference_id".to_string(), metadata.order_id.to_string()),
        ("metadata[orderId]".to_string(), metadata.order_id.to_string()),
        ("metadata[customerId]".to_string(), metadata.customer_id.to_string()),
        ("metadata[restaurantId]".to_string(), metadata.restaurant_id.to_string()),
    ];
    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((format!("{prefix}[price_data][currency]"), request.currency.clone()));
        form.push((format!("{prefix}[price_data][product_data][name]"), item.name.clone()));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount_cents.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }
    form
}

impl PaymentGateway for StripeGateway {
    fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CheckoutSession, GatewayError>> + Send + '_>> {
        Box::pin(self.create_session_impl(request))
    }

    fn get_session(
        &self,
        session_ref: &SessionRef,
    ) -> Pin<Box<dyn Future<Output = Result<SessionDetail, GatewayError>> + Send + '_>> {
        let session_ref = session_ref.clone();
        Box::pin(async move { self.get_session_impl(&session_ref).await })
    }

    fn create_refund(
        &self,
        payment_ref: &PaymentRef,
    ) -> Pin<Box<dyn Future<Output = Result<RefundResult, GatewayError>> + Send + '_>> {
        let payment_ref = payment_ref.clone();
        Box::pin(async move { self.create_refund_impl(&payment_ref).await })
    }

    fn verify_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool {
        let tolerance = i64::try_from(self.config.signature_tolerance.as_secs()).unwrap_or(i64::MAX);
        match signature::verify(payload, signature, secret, self.clock.now().timestamp(), tolerance) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Stripe signature rejected");
                false
            }
        }
    }

    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent, GatewayError> {
        events::parse_event(payload)
    }
}
