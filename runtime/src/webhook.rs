//! Webhook Reconciler: maps gateway events onto Payment Records.
//!
//! Gateway delivery is at-least-once, unordered and possibly concurrent. The
//! reconciler is idempotent because every state change is a single
//! conditional write in the store: duplicates and late arrivals find the
//! record no longer Pending and do nothing. Only the caller whose transition
//! applied hands the payment to the confirmation worker.
//!
//! ```text
//! verify signature ──► parse event ──► find by session ──► CAS Pending → Succeeded
//!        │                                   │                    │
//!    401/400                          not found: ack        winner: confirm_now
//! ```

use crate::confirmation::{ConfirmationAttempt, ConfirmationWorker};
use crate::environment::SagaEnvironment;
use crate::metrics::WebhookMetrics;
use payment_saga_core::error::SagaError;
use payment_saga_core::gateway::GatewayEvent;
use payment_saga_core::payment::{PaymentId, PaymentRef, PaymentStatus, SessionRef, Transition};
use payment_saga_core::store::CasOutcome;

/// Webhook reconciler configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Shared secret for webhook signatures
    pub webhook_secret: String,
}

impl ReconcilerConfig {
    /// Configuration with the given webhook secret.
    #[must_use]
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }
}

impl std::fmt::Debug for ReconcilerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerConfig")
            .field("webhook_secret", &"<redacted>")
            .finish()
    }
}

/// How a delivered event was handled. Every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// This delivery moved the payment to Succeeded
    Reconciled {
        /// Payment
        payment_id: PaymentId,
        /// Result of the inline order confirmation
        confirmation: ConfirmationAttempt,
    },
    /// This delivery moved the payment to Failed
    MarkedFailed {
        /// Payment
        payment_id: PaymentId,
    },
    /// The payment had already left Pending
    AlreadyProcessed {
        /// Payment
        payment_id: PaymentId,
        /// Status found
        status: PaymentStatus,
    },
    /// No payment carries this session reference
    UnknownSession {
        /// Session from the event
        session_ref: SessionRef,
    },
    /// Checkout finished but funds are not captured yet
    AwaitingPayment {
        /// Session from the event
        session_ref: SessionRef,
    },
    /// Event type the saga does not act on
    Ignored {
        /// Provider event type
        event_type: String,
    },
}

/// Verifies and applies gateway webhook events.
#[derive(Clone, Debug)]
pub struct WebhookReconciler {
    env: SagaEnvironment,
    confirmations: ConfirmationWorker,
    config: ReconcilerConfig,
}

impl WebhookReconciler {
    /// Create a reconciler that confirms orders through `confirmations`.
    #[must_use]
    pub const fn new(
        env: SagaEnvironment,
        confirmations: ConfirmationWorker,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            env,
            confirmations,
            config,
        }
    }

    /// Verify, parse and apply one webhook delivery.
    ///
    /// `payload` must be the raw, unparsed request body.
    ///
    /// # Errors
    ///
    /// - [`SagaError::Authentication`]: signature missing or invalid; nothing was read or written
    /// - [`SagaError::Validation`]: authentic body that is not a valid event
    /// - [`SagaError::Storage`]: the lookup or transition failed; the gateway should redeliver
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, SagaError> {
        let Some(signature) = signature.filter(|s| !s.trim().is_empty()) else {
            WebhookMetrics::record_rejected("missing_signature");
            tracing::warn!("Webhook rejected: missing signature header");
            return Err(SagaError::Authentication("missing webhook signature".to_string()));
        };

        if !self
            .env
            .gateway
            .verify_signature(payload, signature, &self.config.webhook_secret)
        {
            WebhookMetrics::record_rejected("signature");
            tracing::warn!("Webhook rejected: signature verification failed");
            return Err(SagaError::Authentication(
                "webhook signature verification failed".to_string(),
            ));
        }

        let event = self.env.gateway.parse_event(payload).map_err(|e| {
            WebhookMetrics::record_rejected("payload");
            tracing::warn!(error = %e, "Webhook rejected: unparseable payload");
            SagaError::Validation(e.to_string())
        })?;

        WebhookMetrics::record_received(event.kind());
        tracing::info!(event_id = %event.event_id(), kind = event.kind(), "Webhook event received");

        match event {
            GatewayEvent::CheckoutCompleted {
                session_ref,
                payment_ref,
                paid: true,
                ..
            }
            | GatewayEvent::AsyncPaymentSucceeded {
                session_ref,
                payment_ref,
                ..
            } => self.reconcile_success(session_ref, payment_ref).await,
            GatewayEvent::CheckoutCompleted {
                session_ref,
                paid: false,
                ..
            } => {
                tracing::info!(session_ref = %session_ref, "Checkout completed, payment not yet captured");
                Ok(WebhookOutcome::AwaitingPayment { session_ref })
            }
            GatewayEvent::AsyncPaymentFailed { session_ref, .. } => {
                self.reconcile_failure(session_ref, "async payment failed").await
            }
            GatewayEvent::SessionExpired { session_ref, .. } => {
                self.reconcile_failure(session_ref, "checkout session expired").await
            }
            GatewayEvent::Other { event_type, .. } => {
                tracing::debug!(event_type = %event_type, "Ignoring webhook event");
                Ok(WebhookOutcome::Ignored { event_type })
            }
        }
    }

    async fn reconcile_success(
        &self,
        session_ref: SessionRef,
        payment_ref: Option<PaymentRef>,
    ) -> Result<WebhookOutcome, SagaError> {
        let Some(record) = self.env.store.find_by_session(&session_ref).await? else {
            tracing::warn!(session_ref = %session_ref, "No payment for checkout session");
            return Ok(WebhookOutcome::UnknownSession { session_ref });
        };
        if record.status != PaymentStatus::Pending {
            return Ok(already_processed(record.id, record.status));
        }

        let outcome = self
            .env
            .store
            .transition(&record.id, Transition::Succeed { payment_ref }, self.env.clock.now())
            .await?;

        match outcome {
            CasOutcome::Applied(payment) => {
                WebhookMetrics::record_transition(PaymentStatus::Succeeded.as_str());
                tracing::info!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    session_ref = %session_ref,
                    "Payment succeeded"
                );
                let confirmation = self.confirmations.confirm_now(&payment).await;
                Ok(WebhookOutcome::Reconciled {
                    payment_id: payment.id,
                    confirmation,
                })
            }
            CasOutcome::Conflict(current) => Ok(already_processed(current.id, current.status)),
        }
    }

    async fn reconcile_failure(
        &self,
        session_ref: SessionRef,
        reason: &str,
    ) -> Result<WebhookOutcome, SagaError> {
        let Some(record) = self.env.store.find_by_session(&session_ref).await? else {
            tracing::warn!(session_ref = %session_ref, "No payment for checkout session");
            return Ok(WebhookOutcome::UnknownSession { session_ref });
        };
        if record.status != PaymentStatus::Pending {
            return Ok(already_processed(record.id, record.status));
        }

        let outcome = self
            .env
            .store
            .transition(
                &record.id,
                Transition::Fail {
                    reason: reason.to_string(),
                },
                self.env.clock.now(),
            )
            .await?;

        match outcome {
            CasOutcome::Applied(payment) => {
                WebhookMetrics::record_transition(PaymentStatus::Failed.as_str());
                tracing::info!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    reason,
                    "Payment failed"
                );
                Ok(WebhookOutcome::MarkedFailed {
                    payment_id: payment.id,
                })
            }
            CasOutcome::Conflict(current) => Ok(already_processed(current.id, current.status)),
        }
    }
}

fn already_processed(payment_id: PaymentId, status: PaymentStatus) -> WebhookOutcome {
    WebhookMetrics::record_duplicate();
    tracing::info!(payment_id = %payment_id, status = %status, "Payment already processed");
    WebhookOutcome::AlreadyProcessed { payment_id, status }
}
