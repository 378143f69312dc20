//! Health check endpoint
//!
//! Reports every configured backend. A backend with a live handle is asked
//! for its operations; a backend without one gets a handle created through
//! the shared registry, so the next probe (or the startup path) reuses it.
//! A backend that startup gave up on is reported as failed without being
//! contacted. The endpoint answers every method on the whole `/healthCheck/`
//! subtree, and always with 200 once the report is encoded.

use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures::future::join_all;
use mcpx_core::{
    BackendConfig, BackendConnector, BackendHealth, BackendResult, Lookup, Registry,
};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::HealthState;

/// Reserved path of the health endpoint
pub const HEALTH_PATH: &str = "/healthCheck/";

/// One element of the flat `mcp_servers` list: a name followed by its info
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HealthEntry {
    Name(String),
    Info(BackendHealth),
}

/// Health document
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub mcp_servers: Vec<HealthEntry>,
    pub uptime: String,
}

/// Router serving [`HEALTH_PATH`] and everything below it
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route(HEALTH_PATH, any(health_check))
        .route("/healthCheck/{*rest}", any(health_check))
        .with_state(state)
}

/// `/healthCheck/`
pub async fn health_check(State(state): State<HealthState>) -> Response {
    let report = build_report(&state).await;

    match serde_json::to_vec(&report) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode health report");
            ApiError::Internal("Failed to encode health report".to_string()).into_response()
        }
    }
}

/// Probe every backend concurrently and assemble the report
pub async fn build_report(state: &HealthState) -> HealthReport {
    let probes = state.backends.iter().map(|(name, config)| {
        let registry = state.registry.clone();
        let connector = state.connector.clone();
        let name = name.clone();
        let config = config.clone();
        let timeout = state.probe_timeout;
        let failure = state.failure(&name);

        tokio::spawn(async move {
            if let Some(message) = failure {
                return BackendHealth::error(message);
            }

            let probe = probe_backend(&registry, connector.as_ref(), &name, &config);
            match tokio::time::timeout(timeout, probe).await {
                Ok(Ok(health)) => health,
                Ok(Err(e)) => {
                    if e.is_transient() {
                        tracing::warn!(backend = %name, error = %e, "Health probe failed");
                    } else {
                        tracing::error!(backend = %name, error = %e, "Health probe failed");
                    }
                    BackendHealth::error(e.to_string())
                }
                Err(_) => {
                    tracing::warn!(backend = %name, ?timeout, "Health probe timed out");
                    BackendHealth::error(format!("health probe timed out after {:?}", timeout))
                }
            }
        })
    });
    let results = join_all(probes).await;

    let mut mcp_servers = Vec::with_capacity(state.backends.len() * 2);
    for (name, result) in state.backends.keys().zip(results) {
        let info = result.unwrap_or_else(|e| {
            tracing::error!(backend = %name, error = %e, "Health probe task failed");
            BackendHealth::unknown()
        });
        mcp_servers.push(HealthEntry::Name(name.clone()));
        mcp_servers.push(HealthEntry::Info(info));
    }

    HealthReport {
        status: "healthy",
        mcp_servers,
        uptime: format_uptime(state.uptime()),
    }
}

async fn probe_backend(
    registry: &Registry,
    connector: &dyn BackendConnector,
    name: &str,
    config: &BackendConfig,
) -> BackendResult<BackendHealth> {
    let lookup = registry
        .get_or_try_create(name, || connector.connect(name, config))
        .await?;

    match lookup {
        Lookup::Created(_) => Ok(BackendHealth::initializing()),
        Lookup::Existing(client) => {
            let operations = client.list_operations().await?;
            Ok(BackendHealth::running(
                operations.into_iter().map(|op| op.name).collect(),
            ))
        }
    }
}

/// Render a duration the way Go's `time.Duration` prints: `1h2m3.5s`, `850ms`
pub fn format_uptime(d: Duration) -> String {
    let nanos = d.as_nanos();
    match nanos {
        0 => "0s".to_string(),
        1..=999 => format!("{}ns", nanos),
        1_000..=999_999 => format!("{}µs", decimal(nanos, 1_000)),
        1_000_000..=999_999_999 => format!("{}ms", decimal(nanos, 1_000_000)),
        _ => {
            let total = d.as_secs();
            let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
            let mut out = String::new();
            if hours > 0 {
                out.push_str(&format!("{}h", hours));
            }
            if hours > 0 || minutes > 0 {
                out.push_str(&format!("{}m", minutes));
            }
            let sub = u128::from(seconds) * 1_000_000_000 + u128::from(d.subsec_nanos());
            out.push_str(&format!("{}s", decimal(sub, 1_000_000_000)));
            out
        }
    }
}

/// `value / unit` with trailing fractional zeros dropped
fn decimal(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let rem = value % unit;
    if rem == 0 {
        return whole.to_string();
    }
    let width = unit.to_string().len() - 1;
    let frac = format!("{:0width$}", rem, width = width);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HealthState;
    use async_trait::async_trait;
    use mcpx_core::{BackendClient, BackendError, HealthStatus, OperationInfo};
    use rstest::rstest;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubClient(String);

    #[async_trait]
    impl BackendClient for StubClient {
        fn name(&self) -> &str {
            &self.0
        }

        async fn list_operations(&self) -> BackendResult<Vec<OperationInfo>> {
            if self.0 == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(vec![OperationInfo::new("forecast"), OperationInfo::new("alerts")])
        }

        async fn close(&self) -> BackendResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubConnector {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl BackendConnector for StubConnector {
        async fn connect(
            &self,
            name: &str,
            _config: &BackendConfig,
        ) -> BackendResult<Arc<dyn BackendClient>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if name == "broken" {
                return Err(BackendError::Connect("connection refused".into()));
            }
            Ok(Arc::new(StubClient(name.to_string())))
        }
    }

    fn state(names: &[&str], connector: Arc<StubConnector>) -> HealthState {
        let backends: BTreeMap<String, BackendConfig> = names
            .iter()
            .map(|n| (n.to_string(), BackendConfig::default()))
            .collect();
        HealthState::new(Registry::new(), connector, backends, Duration::from_millis(100))
    }

    fn infos(report: &HealthReport) -> Vec<(String, BackendHealth)> {
        report
            .mcp_servers
            .chunks(2)
            .map(|pair| match pair {
                [HealthEntry::Name(n), HealthEntry::Info(i)] => (n.clone(), i.clone()),
                other => panic!("unexpected entries {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn first_probe_initializes_second_runs() {
        let connector = Arc::new(StubConnector::default());
        let state = state(&["weather"], Arc::clone(&connector));

        let first = build_report(&state).await;
        assert_eq!(first.status, "healthy");
        assert_eq!(infos(&first)[0].1.status, HealthStatus::Initializing);

        let second = build_report(&state).await;
        let (name, info) = &infos(&second)[0];
        assert_eq!(name, "weather");
        assert_eq!(info.status, HealthStatus::Running);
        assert_eq!(info.tools, vec!["forecast".to_string(), "alerts".to_string()]);

        build_report(&state).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_create_reports_error_and_retries() {
        let connector = Arc::new(StubConnector::default());
        let state = state(&["broken", "weather"], Arc::clone(&connector));

        let report = build_report(&state).await;
        let entries = infos(&report);
        assert_eq!(entries[0].0, "broken");
        assert_eq!(entries[0].1.status, HealthStatus::Error);
        assert!(entries[0].1.error.contains("connection refused"));
        assert_eq!(entries[1].1.status, HealthStatus::Initializing);

        build_report(&state).await;
        // "broken" is retried, "weather" is reused
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recorded_failure_is_reported_without_connecting() {
        let connector = Arc::new(StubConnector::default());
        let state = state(&["weather"], Arc::clone(&connector));
        state.record_failure("weather", "failed to initialize: tools rejected");

        let report = build_report(&state).await;
        let (_, info) = &infos(&report)[0];
        assert_eq!(info.status, HealthStatus::Error);
        assert_eq!(info.error, "failed to initialize: tools rejected");
        assert!(info.tools.is_empty());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_backend_times_out_without_blocking_others() {
        let connector = Arc::new(StubConnector::default());
        let state = state(&["slow", "weather"], connector);
        build_report(&state).await;

        let report = build_report(&state).await;
        let entries = infos(&report);
        assert_eq!(entries[0].1.status, HealthStatus::Error);
        assert!(entries[0].1.error.contains("timed out"));
        assert_eq!(entries[1].1.status, HealthStatus::Running);
    }

    #[tokio::test]
    async fn endpoint_serves_flat_json() {
        use tower::ServiceExt;

        let connector = Arc::new(StubConnector::default());
        let router = health_router(state(&["weather"], connector));
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri(HEALTH_PATH)
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["mcp_servers"][0], "weather");
        assert_eq!(json["mcp_servers"][1]["Status"], "initializing");
        assert_eq!(json["mcp_servers"][1]["tools"], serde_json::json!([]));
        assert_eq!(json["mcp_servers"][1]["error"], "");
        assert!(json["uptime"].is_string());
    }

    #[rstest]
    #[case("GET", "/healthCheck/")]
    #[case("POST", "/healthCheck/")]
    #[case("GET", "/healthCheck/extra")]
    #[case("HEAD", "/healthCheck/a/b")]
    #[tokio::test]
    async fn endpoint_covers_subtree_and_methods(#[case] method: &str, #[case] path: &str) {
        use tower::ServiceExt;

        let connector = Arc::new(StubConnector::default());
        let router = health_router(state(&[], connector));
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method(method)
                    .uri(path)
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[rstest]
    #[case(Duration::ZERO, "0s")]
    #[case(Duration::from_nanos(1_500), "1.5µs")]
    #[case(Duration::from_millis(850), "850ms")]
    #[case(Duration::from_secs(90), "1m30s")]
    #[case(Duration::from_millis(3_723_500), "1h2m3.5s")]
    #[case(Duration::from_secs(3600), "1h0m0s")]
    fn uptime_formats_like_go(#[case] d: Duration, #[case] expected: &str) {
        assert_eq!(format_uptime(d), expected);
    }
}
