//! HTTP pass-through adapter
//!
//! Exposes a connected backend under its mount path by forwarding each
//! request to the backend URL. The path remainder after the mount prefix
//! and the query string are appended to the backend URL; the response body
//! is streamed back as it arrives. A remainder with dot segments is refused
//! so a request cannot climb out of the backend's configured path.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::response::Response;
use axum::Router;
use mcpx_api::{AdapterServer, ApiError, BackendAdapter};
use mcpx_core::{BackendClient, BackendConfig, BackendResult, ServerInfo};
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{backend_url, build_http_client};
use crate::error::Result;

/// Largest request body forwarded to a backend
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Headers that describe one hop, never forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn end_to_end(headers: &HeaderMap, drop_authorization: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name)
            || name.as_str() == "keep-alive"
            || *name == header::CONTENT_LENGTH
            || (drop_authorization && *name == header::AUTHORIZATION)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Forwarding target of one backend
#[derive(Debug, Clone)]
struct Target {
    name: Arc<str>,
    route: Arc<str>,
    url: Url,
    http: Client,
}

impl Target {
    /// Backend URL for a request path under the mount prefix, `None` when
    /// the remainder has dot segments
    fn resolve(&self, path: &str, query: Option<&str>) -> Option<Url> {
        let rest = path.strip_prefix(&*self.route).unwrap_or("");
        if rest.split('/').any(is_dot_segment) {
            return None;
        }
        let mut url = self.url.clone();
        if !rest.is_empty() {
            let joined = format!("{}/{}", url.path().trim_end_matches('/'), rest);
            url.set_path(&joined);
        }
        url.set_query(query);
        Some(url)
    }
}

/// `.` or `..`, including the percent-encoded spellings `Url` also resolves
fn is_dot_segment(segment: &str) -> bool {
    matches!(
        segment.to_ascii_lowercase().as_str(),
        "." | ".." | "%2e" | ".%2e" | "%2e." | "%2e%2e"
    )
}

/// Builds [`HttpAdapterServer`]s from backend configuration
#[derive(Debug, Clone)]
pub struct HttpAdapter {
    backends: Arc<BTreeMap<String, BackendConfig>>,
}

impl HttpAdapter {
    /// Adapter for the backends in `backends`, keyed by name
    pub fn new(backends: BTreeMap<String, BackendConfig>) -> Self {
        Self {
            backends: Arc::new(backends),
        }
    }

    fn target(&self, name: &str, route: &str) -> Result<Target> {
        let default = BackendConfig::default();
        let config = self.backends.get(name).unwrap_or(&default);
        Ok(Target {
            name: Arc::from(name),
            route: Arc::from(route),
            url: backend_url(name, config)?,
            http: build_http_client(name, config)?,
        })
    }
}

impl BackendAdapter for HttpAdapter {
    fn register(
        &self,
        name: &str,
        client: Arc<dyn BackendClient>,
        route: &str,
        _info: &ServerInfo,
    ) -> BackendResult<Box<dyn AdapterServer>> {
        let target = self.target(name, route)?;
        debug!(backend = %name, %route, url = %target.url, "Registered HTTP adapter");
        Ok(Box::new(HttpAdapterServer { client, target }))
    }
}

/// Forwarding server for one backend
pub struct HttpAdapterServer {
    client: Arc<dyn BackendClient>,
    target: Target,
}

#[async_trait]
impl AdapterServer for HttpAdapterServer {
    async fn add_to_server(&self, _info: &ServerInfo) -> BackendResult<()> {
        let operations = self.client.list_operations().await?;
        info!(
            backend = %self.target.name,
            count = operations.len(),
            "Published backend tools"
        );
        Ok(())
    }

    fn handler(&self) -> Router {
        Router::new()
            .fallback(forward)
            .with_state(self.target.clone())
    }
}

async fn forward(State(target): State<Target>, request: Request) -> std::result::Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let url = target
        .resolve(parts.uri.path(), parts.uri.query())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid path {}", parts.uri.path())))?;

    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read request body: {}", e)))?;

    let upstream = target
        .http
        .request(parts.method.clone(), url.clone())
        .headers(end_to_end(&parts.headers, true))
        .body(body)
        .send()
        .await
        .map_err(|e| {
            warn!(backend = %target.name, %url, error = %e, "Upstream request failed");
            ApiError::BadGateway(format!("Backend '{}' is unreachable", target.name))
        })?;

    let status = upstream.status();
    let headers = end_to_end(upstream.headers(), false);
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpConnector;
    use crate::testing::{MockMcp, TestServer};
    use axum::http::StatusCode;
    use mcpx_core::{BackendConnector, OperationInfo};
    use rstest::rstest;

    fn info() -> ServerInfo {
        ServerInfo {
            name: "mcpx-test".into(),
            version: "0.0.0".into(),
        }
    }

    fn target(url: &str, route: &str) -> Target {
        Target {
            name: Arc::from("weather"),
            route: Arc::from(route),
            url: Url::parse(url).unwrap(),
            http: Client::new(),
        }
    }

    #[rstest]
    #[case("/mcp/weather/", None, "http://b:1/mcp")]
    #[case("/mcp/weather/sse", None, "http://b:1/mcp/sse")]
    #[case("/mcp/weather/a/b", Some("x=1"), "http://b:1/mcp/a/b?x=1")]
    fn resolves_backend_url(
        #[case] path: &str,
        #[case] query: Option<&str>,
        #[case] expected: &str,
    ) {
        let target = target("http://b:1/mcp", "/mcp/weather/");
        assert_eq!(target.resolve(path, query).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("/mcp/weather/../../../tenant-b/admin")]
    #[case("/mcp/weather/a/./b")]
    #[case("/mcp/weather/%2E%2E/admin")]
    #[case("/mcp/weather/.%2e")]
    fn dot_segments_never_leave_backend_path(#[case] path: &str) {
        let target = target("http://backend.local/tenant-a/mcp", "/mcp/weather/");
        assert_eq!(target.resolve(path, None), None);
    }

    #[tokio::test]
    async fn dot_segment_request_is_400() {
        use tower::ServiceExt;

        let target = target("http://127.0.0.1:1/mcp", "/mcp/weather/");
        let router = Router::new().fallback(forward).with_state(target);
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/mcp/weather/%2e%2e/admin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn strips_hop_by_hop_and_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer t".parse().unwrap());
        headers.insert(header::CONNECTION, "close".parse().unwrap());
        headers.insert("mcp-session-id", "s1".parse().unwrap());

        let forwarded = end_to_end(&headers, true);
        assert!(forwarded.get(header::AUTHORIZATION).is_none());
        assert!(forwarded.get(header::CONNECTION).is_none());
        assert_eq!(forwarded["mcp-session-id"], "s1");

        assert!(end_to_end(&headers, false).get(header::AUTHORIZATION).is_some());
    }

    #[tokio::test]
    async fn forwards_requests_under_mount_prefix() {
        use tower::ServiceExt;

        let backend = MockMcp::new(["forecast"]);
        let server = TestServer::start(backend.router()).await.unwrap();
        let config = BackendConfig::with_url(server.mcp_url());

        let client = HttpConnector::new(info())
            .connect("weather", &config)
            .await
            .unwrap();
        let adapter = HttpAdapter::new(BTreeMap::from([("weather".to_string(), config)]));
        let adapted = adapter
            .register("weather", client, "/mcp/weather/", &info())
            .unwrap();
        adapted.add_to_server(&info()).await.unwrap();

        let response = adapted
            .handler()
            .oneshot(
                axum::http::Request::builder()
                    .method("PUT")
                    .uri("/mcp/weather/echo?x=1")
                    .header(header::AUTHORIZATION, "Bearer gateway-token")
                    .header("mcp-session-id", "abc")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-upstream"], "mock-mcp");

        let seen = backend.forwarded();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "PUT");
        assert_eq!(seen[0].path, "/mcp/echo");
        assert_eq!(seen[0].query.as_deref(), Some("x=1"));
        assert_eq!(seen[0].authorization, None);
        assert_eq!(seen[0].session.as_deref(), Some("abc"));
        assert_eq!(seen[0].body, "payload");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_502() {
        use tower::ServiceExt;

        let target = target("http://127.0.0.1:1/mcp", "/mcp/weather/");
        let router = Router::new().fallback(forward).with_state(target);
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/mcp/weather/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn register_without_url_fails() {
        struct Dummy;

        #[async_trait]
        impl BackendClient for Dummy {
            fn name(&self) -> &str {
                "x"
            }
            async fn list_operations(&self) -> BackendResult<Vec<OperationInfo>> {
                Ok(vec![])
            }
            async fn close(&self) -> BackendResult<()> {
                Ok(())
            }
        }

        let adapter = HttpAdapter::new(BTreeMap::new());
        let result = adapter.register("x", Arc::new(Dummy), "/x/", &info());
        assert!(matches!(
            result,
            Err(mcpx_core::BackendError::InvalidConfig(_))
        ));
    }
}
