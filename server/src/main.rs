//! Marketplace HTTP server.

use anyhow::Context;
use marketplace_core::environment::SystemClock;
use marketplace_core::ports::{Cache, MarketplaceStore, Notifier};
use marketplace_postgres::PgMarketplaceStore;
use marketplace_server::auth::TokenVerifier;
use marketplace_server::cache::RedisCache;
use marketplace_server::config::{Config, SweepConfig};
use marketplace_server::notify::{HttpNotifier, LogNotifier};
use marketplace_server::stripe::StripeClient;
use marketplace_server::webhook::WebhookVerifier;
use marketplace_server::{build_router, metrics, AppState, MarketplaceService};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,marketplace=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting marketplace server");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        metrics_addr = %config.server.metrics_addr,
        realtime = config.realtime.url.is_some(),
        "Configuration loaded"
    );

    PrometheusBuilder::new()
        .with_http_listener(config.server.metrics_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    metrics::register_business_metrics();

    info!("Connecting to database...");
    let pg = PgMarketplaceStore::connect(&config.database.url)
        .await
        .context("Failed to connect to the database")?;
    if config.database.run_migrations {
        pg.migrate().await.context("Failed to run migrations")?;
        info!("Migrations applied");
    }
    let store: Arc<dyn MarketplaceStore> = Arc::new(pg);

    info!("Connecting to Redis...");
    let cache: Arc<dyn Cache> = Arc::new(
        RedisCache::connect(&config.redis.url)
            .await
            .context("Failed to connect to Redis")?,
    );

    let processor = Arc::new(
        StripeClient::new(
            config.payments.api_base.clone(),
            config.payments.secret_key.clone(),
            config.payments.request_timeout,
        )
        .context("Failed to build the payment processor client")?,
    );

    let notifier: Arc<dyn Notifier> = match &config.realtime.url {
        Some(url) => Arc::new(
            HttpNotifier::new(url.clone(), config.realtime.token.clone())
                .context("Failed to build the realtime client")?,
        ),
        None => {
            warn!("REALTIME_URL not set; notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let marketplace = MarketplaceService::new(
        store,
        processor,
        notifier,
        Arc::new(SystemClock),
        config.fees,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeps = spawn_sweeps(marketplace.clone(), config.sweeps.clone(), shutdown_rx);

    let state = AppState::new(
        marketplace,
        cache,
        TokenVerifier::new(
            &config.auth.jwt_secret,
            config.auth.issuer.clone(),
            config.auth.cookie_name.clone(),
        ),
        WebhookVerifier::new(
            config.payments.webhook_secret.clone(),
            config.payments.webhook_tolerance,
        ),
        config.rate_limit,
        config.sweeps.batch_size,
    );
    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeps.await {
        error!(error = %e, "Background sweeps did not stop cleanly");
    }
    info!("Marketplace server stopped");
    Ok(())
}

/// Run the payout and auto-confirm sweeps on an interval until shutdown.
fn spawn_sweeps(
    marketplace: MarketplaceService,
    sweeps: SweepConfig,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweeps.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = sweeps.interval.as_secs(), "Background sweeps started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if let Err(e) = marketplace.run_payout_sweep(sweeps.batch_size).await {
                error!(error = %e, "Payout sweep failed");
            }
            if let Err(e) = marketplace
                .auto_confirm(sweeps.auto_confirm_after, sweeps.batch_size)
                .await
            {
                error!(error = %e, "Auto-confirm sweep failed");
            }
        }
        info!("Background sweeps stopped");
    })
}

/// Graceful shutdown signal handler.
///
/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
