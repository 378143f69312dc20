//! Integration tests for the MCP gateway
//!
//! This crate contains end-to-end tests that run a real [`Gateway`] on an
//! ephemeral port and talk to it over HTTP:
//! - backend bring-up with fatal and tolerated failures
//! - per-backend middleware (recovery, auth)
//! - the health check and its shared registry
//! - graceful shutdown and its deadline
//!
//! The library part holds in-process collaborators: [`MockConnector`] and
//! [`MockAdapter`] stand in for a protocol client, and [`RunningGateway`]
//! drives a gateway from a test.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p mcpx-tests
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use mcpx_api::{AdapterServer, BackendAdapter};
use mcpx_core::{
    BackendClient, BackendConfig, BackendConnector, BackendError, BackendResult, OperationInfo,
    ProxyConfig, ServerInfo,
};
use mcpx_gateway::{Gateway, GatewayError, LifecycleState};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Client handed out by [`MockConnector`]
pub struct MockClient {
    name: String,
    tools: Vec<String>,
    closed: AtomicUsize,
}

impl MockClient {
    /// Number of times `close` was called
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendClient for MockClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_operations(&self) -> BackendResult<Vec<OperationInfo>> {
        if self.close_count() > 0 {
            return Err(BackendError::Closed);
        }
        Ok(self.tools.iter().map(OperationInfo::new).collect())
    }

    async fn close(&self) -> BackendResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that succeeds for every backend not marked as failing
#[derive(Default)]
pub struct MockConnector {
    failing: HashSet<String>,
    delay: Option<Duration>,
    connects: Mutex<HashMap<String, usize>>,
    clients: Mutex<HashMap<String, Arc<MockClient>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connections to `name`
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Delay every connect by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Connect attempts made for `name`
    pub fn connects(&self, name: &str) -> usize {
        self.connects.lock().get(name).copied().unwrap_or(0)
    }

    /// Last client created for `name`
    pub fn client(&self, name: &str) -> Option<Arc<MockClient>> {
        self.clients.lock().get(name).cloned()
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn connect(
        &self,
        name: &str,
        _config: &BackendConfig,
    ) -> BackendResult<Arc<dyn BackendClient>> {
        *self.connects.lock().entry(name.to_string()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(name) {
            return Err(BackendError::Connect(format!("{} refused the connection", name)));
        }

        let client = Arc::new(MockClient {
            name: name.to_string(),
            tools: vec![format!("{}_tool", name)],
            closed: AtomicUsize::new(0),
        });
        self.clients
            .lock()
            .insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

/// Delay of the `slow` endpoint served by [`MockAdapter`]
pub const SLOW_RESPONSE: Duration = Duration::from_millis(300);

/// Adapter whose handlers answer in-process.
///
/// Under each mount prefix, `panic` panics, `slow` answers after
/// [`SLOW_RESPONSE`] and every other path echoes the backend and path.
#[derive(Default)]
pub struct MockAdapter {
    failing_publish: HashSet<String>,
    published: Arc<AtomicUsize>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `add_to_server` for `name`
    pub fn failing_publish(mut self, name: &str) -> Self {
        self.failing_publish.insert(name.to_string());
        self
    }

    /// Successful `add_to_server` calls
    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

impl BackendAdapter for MockAdapter {
    fn register(
        &self,
        name: &str,
        _client: Arc<dyn BackendClient>,
        route: &str,
        _info: &ServerInfo,
    ) -> BackendResult<Box<dyn AdapterServer>> {
        Ok(Box::new(MockServer {
            target: EchoTarget {
                backend: Arc::from(name),
                route: Arc::from(route),
            },
            fail_publish: self.failing_publish.contains(name),
            published: Arc::clone(&self.published),
        }))
    }
}

#[derive(Clone)]
struct EchoTarget {
    backend: Arc<str>,
    route: Arc<str>,
}

struct MockServer {
    target: EchoTarget,
    fail_publish: bool,
    published: Arc<AtomicUsize>,
}

#[async_trait]
impl AdapterServer for MockServer {
    async fn add_to_server(&self, _info: &ServerInfo) -> BackendResult<()> {
        if self.fail_publish {
            return Err(BackendError::Protocol(format!(
                "{} rejected the tool listing",
                self.target.backend
            )));
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn handler(&self) -> Router {
        Router::new()
            .fallback(echo)
            .with_state(self.target.clone())
    }
}

async fn echo(State(target): State<EchoTarget>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let rest = path.strip_prefix(&*target.route).unwrap_or_default();

    match rest {
        "panic" => panic!("handler for {} blew up", target.backend),
        "slow" => tokio::time::sleep(SLOW_RESPONSE).await,
        _ => {}
    }

    Json(json!({ "backend": &*target.backend, "path": path })).into_response()
}

/// A gateway running on a background task
pub struct RunningGateway {
    pub addr: SocketAddr,
    pub state: watch::Receiver<LifecycleState>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), GatewayError>>,
}

impl RunningGateway {
    /// Start `gateway` and wait until it listens
    pub async fn start(gateway: Gateway) -> Result<Self, GatewayError> {
        let mut listening = gateway.listening();
        let state = gateway.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let mut handle = tokio::spawn(gateway.run(async {
            let _ = stop_rx.await;
        }));

        let started = tokio::select! {
            addr = listening.wait_for(Option::is_some) => addr.ok().and_then(|addr| *addr).ok_or(None),
            result = &mut handle => Err(Some(result)),
        };
        let addr = match started {
            Ok(addr) => addr,
            Err(finished) => {
                let result = match finished {
                    Some(result) => result,
                    None => handle.await,
                };
                return Err(match result {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => GatewayError::Task("gateway stopped before listening".into()),
                    Err(e) => GatewayError::Task(e.to_string()),
                });
            }
        };

        Ok(Self {
            addr,
            state,
            stop_tx: Some(stop_tx),
            handle,
        })
    }

    /// URL of `path` on the gateway
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait until every backend connect task has finished
    pub async fn wait_serving(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state != LifecycleState::Connecting)
            .await;
    }

    /// Fire the stop trigger without waiting
    pub fn trigger_stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Fire the stop trigger and wait for `run` to return
    pub async fn stop(mut self) -> Result<(), GatewayError> {
        self.trigger_stop();
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(e) => Err(GatewayError::Task(e.to_string())),
        }
    }
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Config with a `/mcp` base path listening on an ephemeral local port
pub fn test_config(backends: &[&str]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.mcp_proxy.base_url = "http://localhost/mcp".into();
    config.mcp_proxy.addr = "127.0.0.1:0".into();
    for name in backends {
        config
            .mcp_servers
            .insert(name.to_string(), BackendConfig::default());
    }
    config
}
