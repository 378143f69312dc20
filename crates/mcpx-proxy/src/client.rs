//! Streamable-HTTP MCP client

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mcpx_core::{
    BackendClient, BackendConfig, BackendConnector, BackendResult, OperationInfo, ServerInfo,
};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, trace};
use url::Url;

use crate::error::{ProxyError, Result};
use crate::sse::SseParser;
use crate::types::{
    Implementation, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ToolsListResult, PROTOCOL_VERSION,
};

/// Header carrying the backend-assigned session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the `reqwest` client for a backend: configured headers on every
/// request, per-request timeout from the config
pub(crate) fn build_http_client(name: &str, config: &BackendConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    for (key, value) in &config.headers {
        let header = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            ProxyError::InvalidConfig(format!("backend '{}': header '{}': {}", name, key, e))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            ProxyError::InvalidConfig(format!("backend '{}': header '{}': {}", name, key, e))
        })?;
        headers.insert(header, value);
    }

    let timeout = config
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);

    Ok(Client::builder()
        .timeout(timeout)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .default_headers(headers)
        .build()?)
}

/// Parse the backend's `url`, failing when it is missing
pub(crate) fn backend_url(name: &str, config: &BackendConfig) -> Result<Url> {
    let url = config
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ProxyError::InvalidConfig(format!("backend '{}' has no url", name)))?;
    Ok(Url::parse(url)?)
}

/// Connected MCP client for one backend
#[derive(Debug)]
pub struct HttpClient {
    name: String,
    http: Client,
    endpoint: Url,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HttpClient {
    /// Create an unconnected client; call [`initialize`](Self::initialize) next
    pub fn new(name: &str, config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            http: build_http_client(name, config)?,
            endpoint: backend_url(name, config)?,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Perform the `initialize` handshake
    #[instrument(skip(self, client_info), fields(backend = %self.name))]
    pub async fn initialize(&self, client_info: &ServerInfo) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: Value::Object(Default::default()),
            client_info: Implementation {
                name: client_info.name.clone(),
                version: client_info.version.clone(),
            },
        };

        let result: InitializeResult = serde_json::from_value(
            self.request("initialize", Some(serde_json::to_value(&params)?))
                .await?,
        )?;

        info!(
            backend = %self.name,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "MCP server initialized"
        );

        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// Send a JSON-RPC request and return its `result`
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.ensure_open()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        trace!(backend = %self.name, method, id, "client -> MCP server");

        let response = self.post(&request).await?;
        let message = read_response(response, &request.id).await?;

        if let Some(err) = message.error {
            return Err(ProxyError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        message
            .result
            .ok_or_else(|| ProxyError::Parse(format!("{} returned no result", method)))
    }

    /// Send a JSON-RPC notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_open()?;
        trace!(backend = %self.name, method, "client -> MCP server (notification)");
        self.post(&JsonRpcNotification::new(method, params)).await?;
        Ok(())
    }

    async fn post<T: Serialize + ?Sized>(&self, body: &T) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProxyError::status(status.as_u16(), message));
        }
        Ok(response)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ProxyError::Closed)
        } else {
            Ok(())
        }
    }

    /// Session id assigned by the backend, if any
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }
}

/// Read the JSON-RPC response for `id` from a JSON body or an event stream
async fn read_response(response: reqwest::Response, id: &Value) -> Result<JsonRpcResponse> {
    let is_stream = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    if !is_stream {
        let bytes = response.bytes().await?;
        return Ok(serde_json::from_slice(&bytes)?);
    }

    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        for event in parser.feed(&chunk?) {
            if let Some(message) = match_response(&event.data, id) {
                return Ok(message);
            }
        }
    }
    parser
        .finish()
        .and_then(|event| match_response(&event.data, id))
        .ok_or_else(|| ProxyError::Parse("event stream ended without a response".into()))
}

fn match_response(data: &str, id: &Value) -> Option<JsonRpcResponse> {
    match serde_json::from_str::<JsonRpcResponse>(data) {
        Ok(message) if &message.id == id => Some(message),
        Ok(_) => {
            trace!("Skipping unrelated message on event stream");
            None
        }
        Err(e) => {
            trace!(error = %e, "Skipping non-response event");
            None
        }
    }
}

#[async_trait]
impl BackendClient for HttpClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_operations(&self) -> BackendResult<Vec<OperationInfo>> {
        let mut operations = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor
                .take()
                .map(|cursor| serde_json::json!({ "cursor": cursor }));
            let page: ToolsListResult = serde_json::from_value(self.request("tools/list", params).await?)
                .map_err(ProxyError::from)?;

            operations.extend(page.tools.into_iter().map(|tool| OperationInfo {
                name: tool.name,
                description: tool.description,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(backend = %self.name, count = operations.len(), "Fetched MCP tools");
        Ok(operations)
    }

    async fn close(&self) -> BackendResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(session) = self.session_id() else {
            return Ok(());
        };

        let response = self
            .http
            .delete(self.endpoint.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await
            .map_err(ProxyError::from)?;

        let status = response.status();
        // Servers without explicit session termination answer 405
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            debug!(backend = %self.name, "MCP session closed");
            Ok(())
        } else {
            Err(ProxyError::status(status.as_u16(), "session termination rejected").into())
        }
    }
}

/// Connects backends over streamable HTTP
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client_info: ServerInfo,
}

impl HttpConnector {
    /// `client_info` is the identity sent in every `initialize`
    pub fn new(client_info: ServerInfo) -> Self {
        Self { client_info }
    }
}

#[async_trait]
impl BackendConnector for HttpConnector {
    async fn connect(
        &self,
        name: &str,
        config: &BackendConfig,
    ) -> BackendResult<Arc<dyn BackendClient>> {
        let client = HttpClient::new(name, config)?;
        client.initialize(&self.client_info).await?;
        Ok(Arc::new(client))
    }
}
