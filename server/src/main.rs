//! Order-payment saga HTTP server.
//!
//! Serves checkout, webhook and refund routes, and runs the order
//! confirmation worker in the background.

use anyhow::Context;
use payment_saga_postgres::{PostgresConfirmationQueue, PostgresPaymentStore};
use payment_saga_runtime::metrics::MetricsServer;
use payment_saga_runtime::{ConfirmationWorker, SagaEnvironment};
use payment_saga_server::{Config, HttpOrderService};
use payment_saga_stripe::StripeGateway;
use payment_saga_web::{AppState, payment_router};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payment_saga=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting payment saga server");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        listen = %config.listen_addr(),
        stripe_api = %config.stripe.api_base,
        order_service = %config.order_service.base_url,
        bearer_auth = config.api_token.is_some(),
        cors_origins = ?config.server.cors_allowed_origins,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr()?);
    metrics.start().context("Failed to start metrics exporter")?;

    info!("Connecting to payment database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await
        .context("Failed to connect to payment database")?;
    let store = PostgresPaymentStore::from_pool(pool.clone());
    store.migrate().await.context("Failed to run migrations")?;
    info!("Payment database ready");

    let gateway = StripeGateway::new(config.stripe_config())?;
    let orders = HttpOrderService::new(
        config.order_service.base_url.clone(),
        Duration::from_secs(config.order_service.request_timeout),
    )?;

    let env = SagaEnvironment::new(
        Arc::new(store),
        Arc::new(PostgresConfirmationQueue::new(pool)),
        Arc::new(gateway),
        Arc::new(orders),
    );

    let worker = ConfirmationWorker::new(env.clone(), config.confirmation_config());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(shutdown_rx).await })
    };
    info!("Confirmation worker started");

    let mut state = AppState::new(
        env,
        worker,
        config.checkout_config(),
        config.reconciler_config(),
    )
    .with_allowed_origins(&config.server.cors_allowed_origins);
    if let Some(token) = &config.api_token {
        state = state.with_api_token(token.clone());
    } else {
        warn!("DISABLE_API_AUTH is set; client and operator routes are unauthenticated");
    }
    let app = payment_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining confirmation worker");
    shutdown_tx.send(true).ok();
    let drain = Duration::from_secs(config.server.shutdown_timeout);
    if tokio::time::timeout(drain, worker_handle).await.is_err() {
        warn!(timeout_secs = drain.as_secs(), "Confirmation worker did not stop in time");
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
