//! Prometheus Metrics Module
//!
//! Records client-side metrics through the `metrics` facade.
//!
//! # Metrics Categories
//!
//! - **Requests**: HTTP calls by method and status class
//! - **Sessions**: Token renewals by outcome and expired sessions
//! - **Feed**: Snapshots by transport, push channel losses, state
//! - **Health**: Backend health check results
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use reqwest::{Method, StatusCode};

use crate::domain::feed::{FeedState, Transport};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Render all metrics in Prometheus text format.
///
/// Empty if metrics have not been initialized.
#[must_use]
pub fn render_metrics() -> String {
    get_metrics_handle().map(|h| h.render()).unwrap_or_default()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "exchange_client_http_requests_total",
        "HTTP requests issued by the request pipeline"
    );
    describe_counter!(
        "exchange_client_token_renewals_total",
        "Access token renewal attempts by outcome"
    );
    describe_counter!(
        "exchange_client_sessions_expired_total",
        "Sessions ended because renewal failed"
    );
    describe_counter!(
        "exchange_client_feed_snapshots_total",
        "Order book snapshots applied by transport"
    );
    describe_counter!(
        "exchange_client_push_channel_lost_total",
        "Push channels that failed or closed"
    );
    describe_gauge!(
        "exchange_client_feed_state",
        "Live feed state (0 idle, 1 connecting, 2 live push, 3 live poll, 4 closed)"
    );
    describe_counter!(
        "exchange_client_health_checks_total",
        "Backend health checks by result"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for renewal outcomes.
#[derive(Debug, Clone, Copy)]
pub enum RenewalOutcome {
    /// A new access token was stored.
    Success,
    /// Another caller renewed first; its token was reused.
    Reused,
    /// The credentials changed during the exchange; the result was discarded.
    Superseded,
    /// No refresh token was available.
    NoRefreshToken,
    /// The server rejected the refresh token.
    Rejected,
    /// The refresh endpoint could not be reached.
    Error,
}

impl RenewalOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Reused => "reused",
            Self::Superseded => "superseded",
            Self::NoRefreshToken => "no_refresh_token",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

fn status_class(status: Option<StatusCode>) -> &'static str {
    match status {
        None => "network_error",
        Some(s) => match s.as_u16() {
            200..=299 => "2xx",
            300..=399 => "3xx",
            401 => "401",
            400..=499 => "4xx",
            _ => "5xx",
        },
    }
}

/// Record one HTTP attempt. `None` means no response was received.
pub fn record_http_request(method: &Method, status: Option<StatusCode>) {
    counter!(
        "exchange_client_http_requests_total",
        "method" => method.as_str().to_string(),
        "status" => status_class(status)
    )
    .increment(1);
}

/// Record a renewal attempt.
pub fn record_renewal(outcome: RenewalOutcome) {
    counter!(
        "exchange_client_token_renewals_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a session that expired.
pub fn record_session_expired() {
    counter!("exchange_client_sessions_expired_total").increment(1);
}

/// Record a snapshot applied to the feed.
pub fn record_feed_snapshot(transport: Transport) {
    counter!(
        "exchange_client_feed_snapshots_total",
        "transport" => transport.as_str()
    )
    .increment(1);
}

/// Record a push channel failure or close.
pub fn record_push_channel_lost() {
    counter!("exchange_client_push_channel_lost_total").increment(1);
}

/// Update the feed state gauge.
pub fn set_feed_state(state: FeedState) {
    gauge!("exchange_client_feed_state").set(f64::from(state.code()));
}

/// Record a backend health check.
pub fn record_health_check(healthy: bool) {
    counter!(
        "exchange_client_health_checks_total",
        "result" => if healthy { "up" } else { "down" }
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_outcome_as_str() {
        assert_eq!(RenewalOutcome::Success.as_str(), "success");
        assert_eq!(RenewalOutcome::Reused.as_str(), "reused");
        assert_eq!(RenewalOutcome::NoRefreshToken.as_str(), "no_refresh_token");
        assert_eq!(RenewalOutcome::Rejected.as_str(), "rejected");
        assert_eq!(RenewalOutcome::Error.as_str(), "error");
    }

    #[test]
    fn status_classes() {
        assert_eq!(status_class(None), "network_error");
        assert_eq!(status_class(Some(StatusCode::CREATED)), "2xx");
        assert_eq!(status_class(Some(StatusCode::UNAUTHORIZED)), "401");
        assert_eq!(status_class(Some(StatusCode::BAD_REQUEST)), "4xx");
        assert_eq!(status_class(Some(StatusCode::BAD_GATEWAY)), "5xx");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_http_request(&Method::GET, Some(StatusCode::OK));
        record_renewal(RenewalOutcome::Success);
        set_feed_state(FeedState::LivePush);
        assert!(get_metrics_handle().is_none());
        assert!(render_metrics().is_empty());
    }
}
