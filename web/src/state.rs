//! Application state for Axum handlers.

use axum::http::HeaderValue;
use payment_saga_core::PaymentStore;
use payment_saga_runtime::{
    CheckoutConfig, CheckoutInitiator, ConfirmationWorker, ReconcilerConfig, RefundCoordinator,
    SagaEnvironment, WebhookReconciler,
};
use std::sync::Arc;

/// State shared across all HTTP handlers.
///
/// Every component is cheap to clone; they share the `Arc`s of one
/// [`SagaEnvironment`].
///
/// # Examples
///
/// ```ignore
/// let state = AppState::new(env, worker, CheckoutConfig::default(), ReconcilerConfig::new(secret))
///     .with_api_token("s3cret")
///     .with_allowed_origins(["https://shop.example.com"]);
/// let app = payment_router(state);
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Starts checkout sessions
    pub checkout: CheckoutInitiator,
    /// Applies gateway webhooks
    pub webhooks: WebhookReconciler,
    /// Issues refunds
    pub refunds: RefundCoordinator,
    /// Payment store, for readiness checks
    pub store: Arc<dyn PaymentStore>,
    /// Bearer token required on client and operator routes; `None` disables the check
    pub api_token: Option<Arc<str>>,
    /// Browser origins allowed by CORS; empty allows none
    pub allowed_origins: Vec<HeaderValue>,
}

impl AppState {
    /// Build the saga components over `env`.
    #[must_use]
    pub fn new(
        env: SagaEnvironment,
        worker: ConfirmationWorker,
        checkout: CheckoutConfig,
        reconciler: ReconcilerConfig,
    ) -> Self {
        Self {
            store: Arc::clone(&env.store),
            checkout: CheckoutInitiator::new(env.clone(), checkout),
            webhooks: WebhookReconciler::new(env.clone(), worker, reconciler),
            refunds: RefundCoordinator::new(env),
            api_token: None,
            allowed_origins: Vec::new(),
        }
    }

    /// Require `Authorization: Bearer <token>` on client and operator routes.
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        let token: String = token.into();
        self.api_token = (!token.is_empty()).then(|| Arc::from(token));
        self
    }

    /// Allow cross-origin browser requests from `origins`.
    ///
    /// Origins that are not valid header values are skipped with a warning.
    #[must_use]
    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_origins = origins
            .into_iter()
            .filter_map(|origin| {
                let origin = origin.as_ref();
                HeaderValue::from_str(origin)
                    .inspect_err(|_| tracing::warn!(origin, "Ignoring invalid CORS origin"))
                    .ok()
            })
            .collect();
        self
    }
}
