//! Test utilities for mcpx-proxy
//!
//! [`MockMcp`] is a scripted streamable-HTTP MCP backend; [`TestServer`]
//! serves any router on an ephemeral port and stops when dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::client::SESSION_HEADER;
use crate::types::PROTOCOL_VERSION;

/// Session id handed out by [`MockMcp`]
pub const MOCK_SESSION: &str = "mock-session-1";

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` on `127.0.0.1` with an ephemeral port
    pub async fn start(router: Router) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of the MCP endpoint served by [`MockMcp::router`]
    pub fn mcp_url(&self) -> String {
        format!("{}/mcp", self.base_url())
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

/// How [`MockMcp`] delivers JSON-RPC responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseMode {
    #[default]
    Json,
    EventStream,
}

/// A request that reached [`MockMcp`] outside the MCP endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub session: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct Counters {
    initialized: AtomicUsize,
    deleted: AtomicUsize,
    list_calls: AtomicUsize,
    calls_without_session: AtomicUsize,
    forwarded: Mutex<Vec<ForwardedRequest>>,
}

/// Scripted MCP backend
#[derive(Clone)]
pub struct MockMcp {
    tools: Arc<Vec<String>>,
    page_size: usize,
    mode: ResponseMode,
    required_header: Option<(String, String)>,
    counters: Arc<Counters>,
}

impl MockMcp {
    /// Backend exposing `tools`
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: Arc::new(tools.into_iter().map(Into::into).collect()),
            page_size: 0,
            mode: ResponseMode::Json,
            required_header: None,
            counters: Arc::default(),
        }
    }

    /// Split `tools/list` into pages of `size` (0 disables paging)
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Reject MCP calls that lack `name: value`
    pub fn require_header(mut self, name: &str, value: &str) -> Self {
        self.required_header = Some((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// `POST /mcp` and `DELETE /mcp` speak MCP; every other path echoes
    pub fn router(&self) -> Router {
        Router::new()
            .route("/mcp", post(handle_rpc).delete(handle_delete))
            .fallback(handle_forwarded)
            .with_state(self.clone())
    }

    pub fn initialized(&self) -> usize {
        self.counters.initialized.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> usize {
        self.counters.deleted.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.counters.list_calls.load(Ordering::SeqCst)
    }

    /// Whether every call after `initialize` carried the session id
    pub fn saw_session_on_every_call(&self) -> bool {
        self.counters.calls_without_session.load(Ordering::SeqCst) == 0
    }

    /// Requests received outside the MCP endpoint, oldest first
    pub fn forwarded(&self) -> Vec<ForwardedRequest> {
        self.counters.forwarded.lock().clone()
    }

    fn tools_page(&self, cursor: Option<&str>) -> Value {
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = if self.page_size == 0 {
            self.tools.len()
        } else {
            (start + self.page_size).min(self.tools.len())
        };

        let tools: Vec<Value> = self.tools[start.min(end)..end]
            .iter()
            .map(|name| json!({ "name": name, "description": format!("{} tool", name), "inputSchema": { "type": "object" } }))
            .collect();

        let mut result = json!({ "tools": tools });
        if end < self.tools.len() {
            result["nextCursor"] = json!(end.to_string());
        }
        result
    }

    fn respond(&self, message: Value) -> Response {
        let mut response = match self.mode {
            ResponseMode::Json => Json(message).into_response(),
            ResponseMode::EventStream => {
                let body = format!(
                    "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                    json!({ "jsonrpc": "2.0", "method": "notifications/progress" }),
                    message
                );
                ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
            }
        };
        response.headers_mut().insert(
            SESSION_HEADER,
            header::HeaderValue::from_static(MOCK_SESSION),
        );
        response
    }
}

async fn handle_rpc(State(mock): State<MockMcp>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some((name, value)) = &mock.required_header {
        let present = headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == value);
        if !present {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let Ok(message) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let method = message["method"].as_str().unwrap_or_default().to_string();

    if method != "initialize" && headers.get(SESSION_HEADER).is_none() {
        mock.counters.calls_without_session.fetch_add(1, Ordering::SeqCst);
    }

    // Notifications carry no id
    let Some(id) = message.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };

    let reply = match method.as_str() {
        "initialize" => {
            mock.counters.initialized.fetch_add(1, Ordering::SeqCst);
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "mock-mcp", "version": "1.0.0" }
                }
            })
        }
        "tools/list" => {
            mock.counters.list_calls.fetch_add(1, Ordering::SeqCst);
            let cursor = message["params"]["cursor"].as_str();
            json!({ "jsonrpc": "2.0", "id": id, "result": mock.tools_page(cursor) })
        }
        other => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("Method not found: {}", other) }
        }),
    };
    mock.respond(reply)
}

async fn handle_delete(State(mock): State<MockMcp>) -> StatusCode {
    mock.counters.deleted.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn handle_forwarded(State(mock): State<MockMcp>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();
    let header_str = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let forwarded = ForwardedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        authorization: header_str(header::AUTHORIZATION.as_str()),
        session: header_str(SESSION_HEADER),
        body,
    };
    mock.counters.forwarded.lock().push(forwarded.clone());

    (
        StatusCode::OK,
        [("x-upstream", "mock-mcp")],
        Json(json!({
            "method": forwarded.method,
            "path": forwarded.path,
            "query": forwarded.query,
        })),
    )
        .into_response()
}
