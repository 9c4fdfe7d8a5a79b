//! Backend Health Monitor
//!
//! Polls the backend's health endpoint on a fixed interval and publishes
//! whether it is reachable, so a host application can show an
//! "unavailable" banner. Independent of the request pipeline and the feed.
//!
//! # Endpoint
//!
//! - `GET <origin>/api/health/` - any 2xx means the backend is up

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::{HealthSettings, health_url};
use crate::infrastructure::metrics;

// =============================================================================
// Status
// =============================================================================

/// Reachability of the backend as last observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStatus {
    /// Whether the last check failed.
    pub is_down: bool,
    /// Failed checks since the last success.
    pub consecutive_failures: u32,
    /// When the last check finished.
    pub last_checked: Option<DateTime<Utc>>,
}

impl BackendStatus {
    fn record(&mut self, healthy: bool) {
        self.is_down = !healthy;
        self.consecutive_failures = if healthy {
            0
        } else {
            self.consecutive_failures.saturating_add(1)
        };
        self.last_checked = Some(Utc::now());
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Periodic backend health checker.
pub struct HealthMonitor {
    client: Client,
    url: Url,
    interval: Duration,
    status: watch::Sender<BackendStatus>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// Create a monitor for the backend behind `api_base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_base: &Url,
        settings: &HealthSettings,
        cancel: CancellationToken,
    ) -> Result<Self, HealthMonitorError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| HealthMonitorError::Client(e.to_string()))?;

        let (status, _) = watch::channel(BackendStatus::default());

        Ok(Self {
            client,
            url: health_url(api_base),
            interval: settings.interval,
            status,
            cancel,
        })
    }

    /// Health endpoint being polled.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Last published status.
    #[must_use]
    pub fn status(&self) -> BackendStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified after every check.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<BackendStatus> {
        self.status.subscribe()
    }

    /// Run one check and publish its outcome. Returns whether the backend
    /// answered with a success status.
    pub async fn check_once(&self) -> bool {
        let healthy = match self.client.get(self.url.clone()).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(status = response.status().as_u16(), "Backend health check failed");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "Backend health check unreachable");
                false
            }
        };

        metrics::record_health_check(healthy);

        let mut became_down = false;
        let mut recovered = false;
        self.status.send_modify(|status| {
            became_down = !healthy && !status.is_down;
            recovered = healthy && status.is_down;
            status.record(healthy);
        });

        if became_down {
            tracing::warn!(url = %self.url, "Backend unreachable");
        } else if recovered {
            tracing::info!(url = %self.url, "Backend reachable again");
        }

        healthy
    }

    /// Check immediately, then on every interval until cancelled.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(url = %self.url, interval_ms = self.interval.as_millis(), "Health monitor started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = self.check_once() => {}
            }
        }

        tracing::info!("Health monitor stopped");
    }
}

/// Health monitor error.
#[derive(Debug, thiserror::Error)]
pub enum HealthMonitorError {
    /// The HTTP client could not be built.
    #[error("failed to build health check client: {0}")]
    Client(String),
}
