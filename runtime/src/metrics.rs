//! Prometheus metrics for the saga.
//!
//! This module describes and records the saga's counters:
//! - Checkout sessions created / rejected
//! - Webhook events received, rejected, reconciled
//! - Order confirmations delivered, rescheduled, escalated
//! - Refunds issued / rejected
//!
//! # Example
//!
//! ```rust,no_run
//! use payment_saga_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://0.0.0.0:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics exporter.
///
/// Serves metrics on its own HTTP listener for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe the saga metrics, install the recorder and spawn the exporter.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built or bound.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        describe_metrics();
        tokio::spawn(async move {
            if let Err(_) = exporter.await {
                // ExporterError implements neither Debug nor Display in metrics-exporter-prometheus 0.15.
                tracing::error!("Metrics exporter stopped");
            }
        });
        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(
        "payment_saga.checkout.sessions_created",
        "Checkout sessions created and persisted as Pending payments"
    );
    describe_counter!(
        "payment_saga.checkout.rejected",
        "Checkout requests rejected, by reason"
    );
    describe_counter!(
        "payment_saga.webhook.received",
        "Authentic webhook events received, by event kind"
    );
    describe_counter!(
        "payment_saga.webhook.rejected",
        "Webhook deliveries rejected before processing, by reason"
    );
    describe_counter!(
        "payment_saga.webhook.transitions",
        "Payment transitions applied by the webhook reconciler, by target status"
    );
    describe_counter!(
        "payment_saga.webhook.duplicates",
        "Webhook events that found the payment already processed"
    );
    describe_counter!(
        "payment_saga.confirmation.delivered",
        "Order confirmations accepted by the Order Service"
    );
    describe_counter!(
        "payment_saga.confirmation.rescheduled",
        "Failed order confirmations scheduled for another attempt"
    );
    describe_counter!(
        "payment_saga.confirmation.escalated",
        "Order confirmations that exhausted their attempts"
    );
    describe_counter!(
        "payment_saga.confirmation.healed",
        "Succeeded payments enqueued by the reconciliation sweep"
    );
    describe_counter!("payment_saga.refund.issued", "Refunds issued and recorded");
    describe_counter!(
        "payment_saga.refund.rejected",
        "Refund requests rejected, by reason"
    );
}

/// Checkout metrics recorder.
pub struct CheckoutMetrics;

impl CheckoutMetrics {
    /// Record a created session.
    pub fn record_created() {
        counter!("payment_saga.checkout.sessions_created").increment(1);
    }

    /// Record a rejected checkout.
    pub fn record_rejected(reason: &'static str) {
        counter!("payment_saga.checkout.rejected", "reason" => reason).increment(1);
    }
}

/// Webhook metrics recorder.
pub struct WebhookMetrics;

impl WebhookMetrics {
    /// Record an authentic event.
    pub fn record_received(kind: &'static str) {
        counter!("payment_saga.webhook.received", "kind" => kind).increment(1);
    }

    /// Record a rejected delivery.
    pub fn record_rejected(reason: &'static str) {
        counter!("payment_saga.webhook.rejected", "reason" => reason).increment(1);
    }

    /// Record an applied transition.
    pub fn record_transition(status: &'static str) {
        counter!("payment_saga.webhook.transitions", "status" => status).increment(1);
    }

    /// Record a duplicate or late event.
    pub fn record_duplicate() {
        counter!("payment_saga.webhook.duplicates").increment(1);
    }
}

/// Confirmation metrics recorder.
pub struct ConfirmationMetrics;

impl ConfirmationMetrics {
    /// Record a delivered confirmation.
    pub fn record_delivered() {
        counter!("payment_saga.confirmation.delivered").increment(1);
    }

    /// Record a rescheduled confirmation.
    pub fn record_rescheduled() {
        counter!("payment_saga.confirmation.rescheduled").increment(1);
    }

    /// Record an escalated confirmation.
    pub fn record_escalated() {
        counter!("payment_saga.confirmation.escalated").increment(1);
    }

    /// Record a payment enqueued by the sweep.
    pub fn record_healed() {
        counter!("payment_saga.confirmation.healed").increment(1);
    }
}

/// Refund metrics recorder.
pub struct RefundMetrics;

impl RefundMetrics {
    /// Record an issued refund.
    pub fn record_issued() {
        counter!("payment_saga.refund.issued").increment(1);
    }

    /// Record a rejected refund.
    pub fn record_rejected(reason: &'static str) {
        counter!("payment_saga.refund.rejected", "reason" => reason).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 0)));
        let server = MetricsServer::new(addr);
        assert!(server.render().is_none());
    }

    #[test]
    fn test_recorders_without_exporter_are_noops() {
        CheckoutMetrics::record_created();
        WebhookMetrics::record_rejected("signature");
        ConfirmationMetrics::record_escalated();
        RefundMetrics::record_rejected("invalid_state");
    }
}
