//! Integration tests for the backend health monitor.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use exchange_client::infrastructure::config::normalize_base;
use exchange_client::{HealthMonitor, HealthSettings};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> HealthSettings {
    HealthSettings {
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn reports_up_then_down_then_recovered() {
    let server = MockServer::start().await;
    let api_base = normalize_base(&format!("{}/api", server.uri())).unwrap();
    let monitor = HealthMonitor::new(&api_base, &settings(), CancellationToken::new()).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/health/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/health/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/health/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    assert!(monitor.check_once().await);
    assert!(!monitor.status().is_down);

    assert!(!monitor.check_once().await);
    assert!(!monitor.check_once().await);
    let status = monitor.status();
    assert!(status.is_down);
    assert_eq!(status.consecutive_failures, 2);

    assert!(monitor.check_once().await);
    let status = monitor.status();
    assert!(!status.is_down);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_checked.is_some());
}

#[tokio::test]
async fn unreachable_backend_is_down() {
    let server = MockServer::start().await;
    let api_base = normalize_base(&format!("{}/api", server.uri())).unwrap();
    drop(server);

    let monitor = HealthMonitor::new(&api_base, &settings(), CancellationToken::new()).unwrap();

    assert!(!monitor.check_once().await);
    assert!(monitor.status().is_down);
}

#[tokio::test]
async fn run_checks_periodically_until_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let api_base = normalize_base(&format!("{}/api", server.uri())).unwrap();
    let cancel = CancellationToken::new();
    let monitor = Arc::new(HealthMonitor::new(&api_base, &settings(), cancel.clone()).unwrap());
    let mut updates = monitor.watch();

    let task = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run().await })
    };

    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .expect("health check published")
            .unwrap();
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("monitor stopped")
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests.len() >= 3);
}
