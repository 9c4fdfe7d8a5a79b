//! Exchange Client Binary
//!
//! Signs in (when credentials are configured), follows the live order book
//! of one symbol and watches backend health until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin exchange-client
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `EXCHANGE_API_BASE`: REST base URL (default: http://127.0.0.1:8000/api)
//! - `EXCHANGE_CREDENTIALS_PATH`: Credential file (default: .exchange-client/credentials.json)
//! - `EXCHANGE_USERNAME` / `EXCHANGE_PASSWORD`: Sign in on startup
//! - `EXCHANGE_SYMBOL`: Symbol to follow
//! - `EXCHANGE_REQUEST_TIMEOUT_SECS`: Per-request timeout (default: 10)
//! - `FEED_POLL_INTERVAL_MS`: Poll fallback interval (default: 2000)
//! - `FEED_PUSH_CONNECT_TIMEOUT_SECS`: Push connect timeout (default: 10)
//! - `HEALTH_CHECK_INTERVAL_MS`: Health check interval (default: 5000)
//! - `HEALTH_CHECK_TIMEOUT_MS`: Health check timeout (default: 3000)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: exchange_client=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use exchange_client::infrastructure::telemetry;
use exchange_client::{
    ClientConfig, CredentialStore, ExchangeClient, FileCredentialStore, HealthMonitor,
    LiveFeedController, RequestPipeline, WsPushConnector, init_metrics, render_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting exchange client");

    init_metrics().context("failed to install metrics recorder")?;

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::open(config.credentials_path.clone()));
    let pipeline = Arc::new(
        RequestPipeline::new(&config.http, Arc::clone(&store))
            .context("failed to build request pipeline")?,
    );
    let client = ExchangeClient::new(pipeline);

    if let Some(login) = &config.login {
        match client.sign_in(login.username(), login.password()).await {
            Ok(_) => tracing::info!(username = login.username(), "Signed in"),
            Err(e) => tracing::error!(username = login.username(), error = %e, "Sign-in failed"),
        }
    }
    if let Some(user) = client.current_user() {
        tracing::info!(user = %user, "Session available");
    }

    let health = Arc::new(
        HealthMonitor::new(&config.http.api_base, &config.health, shutdown_token.clone())
            .context("failed to build health monitor")?,
    );
    let health_task = {
        let health = Arc::clone(&health);
        tokio::spawn(async move { health.run().await })
    };

    let feed = LiveFeedController::new(
        Arc::new(client.clone()),
        Arc::new(WsPushConnector::new(config.http.api_base.clone())),
        config.feed.clone(),
    );

    if let Some(symbol) = &config.symbol {
        feed.subscribe(symbol);
        spawn_view_logger(&feed, shutdown_token.clone());
    } else {
        tracing::info!("No EXCHANGE_SYMBOL set, live feed idle");
    }

    tracing::info!("Exchange client ready");

    await_shutdown(shutdown_token).await;

    feed.unsubscribe();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, health_task).await.is_err() {
        tracing::warn!("Health monitor did not stop in time");
    }

    tracing::debug!(metrics = %render_metrics(), "Final metrics");
    tracing::info!("Exchange client stopped");
    Ok(())
}

/// Log every feed view change until shutdown.
fn spawn_view_logger(feed: &LiveFeedController, shutdown: CancellationToken) {
    let mut views = feed.watch();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let view = views.borrow_and_update().clone();
            let status = view
                .status
                .as_ref()
                .map_or_else(|| "none".to_string(), ToString::to_string);
            tracing::info!(
                symbol = view.symbol.as_deref().unwrap_or("-"),
                state = %view.state,
                status = %status,
                best_bid = ?view.snapshot.best_bid().map(|l| l.price),
                best_ask = ?view.snapshot.best_ask().map(|l| l.price),
                "Order book update"
            );
        }
    });
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        api_base = %config.http.api_base,
        credentials_path = %config.credentials_path.display(),
        symbol = config.symbol.as_deref().unwrap_or("-"),
        sign_in = config.login.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        health_url = %config.health_url(),
        poll_interval_ms = config.feed.poll_interval.as_millis(),
        health_interval_ms = config.health.interval.as_millis(),
        "Endpoints and timing"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
