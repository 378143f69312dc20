//! Gateway - connects backends, serves them and shuts down in bounded time

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use mcpx_api::{health_router, BackendAdapter, HealthState, MiddlewareChain, Mux, HEALTH_PATH};
use mcpx_core::{
    base_path, mount_path, BackendConfig, BackendConnector, BackendError, BackendResult,
    EffectiveOptions, ProxyConfig, Registry, ServerInfo,
};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;
use crate::shutdown::ShutdownHooks;

/// Lifecycle of a [`Gateway`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Connecting,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Result of one backend's connect task
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Connected and mounted
    Mounted { backend: String, route: String },
    /// Failed, but the backend does not abort startup
    Tolerated { backend: String, error: BackendError },
    /// Failed, and the backend is marked `panicIfInvalid`
    Fatal { backend: String, error: BackendError },
}

/// State shared with the connect tasks
struct Shared {
    connector: Arc<dyn BackendConnector>,
    adapter: Arc<dyn BackendAdapter>,
    registry: Registry,
    mux: Mux,
    hooks: ShutdownHooks,
    health: HealthState,
    base_path: String,
    info: ServerInfo,
}

/// The gateway process
pub struct Gateway {
    config: ProxyConfig,
    shared: Arc<Shared>,
    state_tx: watch::Sender<LifecycleState>,
    addr_tx: watch::Sender<Option<SocketAddr>>,
}

impl Gateway {
    /// Validate `config` and prepare the route table. Nothing is connected
    /// or bound until [`run`](Self::run).
    pub fn new(
        config: ProxyConfig,
        connector: Arc<dyn BackendConnector>,
        adapter: Arc<dyn BackendAdapter>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        let base_path = base_path(&config.mcp_proxy.base_url)?;

        let registry = Registry::new();
        let mux = Mux::new();
        let health = HealthState::new(
            registry.clone(),
            Arc::clone(&connector),
            config.mcp_servers.clone(),
            config.mcp_proxy.health_probe_timeout(),
        )
        .with_started_at(Instant::now());
        mux.mount(HEALTH_PATH, health_router(health.clone()));

        let shared = Arc::new(Shared {
            connector,
            adapter,
            registry,
            mux,
            hooks: ShutdownHooks::new(),
            health,
            base_path,
            info: config.mcp_proxy.server_info(),
        });

        let (state_tx, _) = watch::channel(LifecycleState::Init);
        let (addr_tx, _) = watch::channel(None);

        Ok(Self {
            config,
            shared,
            state_tx,
            addr_tx,
        })
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Watch the bound address; `Some` once the listener accepts connections
    pub fn listening(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.addr_tx.subscribe()
    }

    /// Registry of live backend clients
    pub fn registry(&self) -> Registry {
        self.shared.registry.clone()
    }

    pub fn mux(&self) -> Mux {
        self.shared.mux.clone()
    }

    pub fn hooks(&self) -> ShutdownHooks {
        self.shared.hooks.clone()
    }

    /// Connect, serve until `shutdown` resolves, then drain.
    ///
    /// Returns `Ok(())` on a clean stop and
    /// [`GatewayError::ShutdownTimeout`] when draining misses the deadline.
    pub async fn run<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send,
    {
        self.state_tx.send_replace(LifecycleState::Connecting);

        let mut critical = JoinSet::new();
        let mut tolerant = JoinSet::new();
        for (name, backend) in &self.config.mcp_servers {
            let options = self.config.effective_options(backend);
            let task = connect_backend(
                Arc::clone(&self.shared),
                name.clone(),
                backend.clone(),
                options.clone(),
            );
            if options.panic_if_invalid {
                critical.spawn(task);
            } else {
                tolerant.spawn(task);
            }
        }
        info!(
            critical = critical.len(),
            tolerant = tolerant.len(),
            "Connecting to backends"
        );

        // Backends that may abort startup must settle before we listen
        while let Some(joined) = critical.join_next().await {
            let failure = match joined {
                Ok(ConnectOutcome::Fatal { backend, error }) => {
                    GatewayError::BackendFatal { backend, source: error }
                }
                Ok(_) => continue,
                Err(e) => GatewayError::Task(e.to_string()),
            };
            critical.abort_all();
            tolerant.abort_all();
            return Err(self.abort_startup(failure).await);
        }

        let addr = self.config.mcp_proxy.listen_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                tolerant.abort_all();
                return Err(self.abort_startup(GatewayError::Bind { addr, source }).await);
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(source) => {
                tolerant.abort_all();
                return Err(self.abort_startup(GatewayError::Bind { addr, source }).await);
            }
        };

        let waiter = spawn_tolerant_waiter(tolerant, self.state_tx.clone());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let app = self.shared.mux.clone().into_router();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });
        self.addr_tx.send_replace(Some(local_addr));
        info!(addr = %local_addr, "Gateway listening");

        tokio::pin!(shutdown);
        let stopped_early = tokio::select! {
            _ = &mut shutdown => None,
            result = &mut server => Some(result),
        };
        if let Some(result) = stopped_early {
            waiter.abort();
            self.shared.registry.close_all().await;
            self.state_tx.send_replace(LifecycleState::Stopped);
            return Err(match result {
                Ok(Ok(())) => GatewayError::Serve(std::io::Error::other("server stopped unexpectedly")),
                Ok(Err(e)) => GatewayError::Serve(e),
                Err(e) => GatewayError::Task(e.to_string()),
            });
        }

        self.state_tx.send_replace(LifecycleState::ShuttingDown);
        let deadline = self.config.mcp_proxy.shutdown_timeout();
        info!(?deadline, "Shutting down");
        let _ = stop_tx.send(());

        let hooks = self.shared.hooks.clone();
        let registry = self.shared.registry.clone();
        let drain = async {
            let (_, served) = tokio::join!(hooks.run(), &mut server);
            waiter.abort();
            // Mounts that finished during the first pass registered late hooks
            hooks.run().await;
            // Health-created or never-mounted handles have no hook
            registry.close_all().await;
            served
        };

        let drained = tokio::time::timeout(deadline, drain).await;
        let outcome = match drained {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(GatewayError::Serve(e)),
            Ok(Err(e)) => Err(GatewayError::Task(e.to_string())),
            Err(_) => {
                server.abort();
                warn!(?deadline, "Shutdown deadline exceeded");
                Err(GatewayError::ShutdownTimeout(deadline))
            }
        };

        self.state_tx.send_replace(LifecycleState::Stopped);
        if outcome.is_ok() {
            info!("Gateway stopped");
        }
        outcome
    }

    async fn abort_startup(&self, failure: GatewayError) -> GatewayError {
        error!(error = %failure, "Startup aborted");
        self.shared.registry.close_all().await;
        self.state_tx.send_replace(LifecycleState::Stopped);
        failure
    }
}

/// Drain the tolerant connect tasks, then report the gateway as serving
fn spawn_tolerant_waiter(
    mut tasks: JoinSet<ConnectOutcome>,
    state_tx: watch::Sender<LifecycleState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (mut mounted, mut failed) = (0usize, 0usize);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ConnectOutcome::Mounted { .. }) => mounted += 1,
                Ok(_) => failed += 1,
                Err(e) => {
                    error!(error = %e, "Backend connect task failed");
                    failed += 1;
                }
            }
        }

        state_tx.send_if_modified(|state| {
            if *state == LifecycleState::Connecting {
                *state = LifecycleState::Serving;
                true
            } else {
                false
            }
        });
        info!(mounted, failed, "All backends initialized");
    })
}

async fn connect_backend(
    shared: Arc<Shared>,
    name: String,
    config: BackendConfig,
    options: EffectiveOptions,
) -> ConnectOutcome {
    info!(backend = %name, "Connecting");

    match mount_backend(&shared, &name, &config, &options).await {
        Ok(route) => {
            info!(backend = %name, %route, "Connected");
            ConnectOutcome::Mounted {
                backend: name,
                route,
            }
        }
        Err(error) if options.panic_if_invalid => {
            error!(backend = %name, %error, "Failed to initialize backend");
            release_client(&shared, &name).await;
            ConnectOutcome::Fatal {
                backend: name,
                error,
            }
        }
        Err(error) => {
            warn!(backend = %name, %error, "Failed to initialize backend, leaving it unmounted");
            shared
                .health
                .record_failure(&name, format!("failed to initialize: {}", error));
            release_client(&shared, &name).await;
            ConnectOutcome::Tolerated {
                backend: name,
                error,
            }
        }
    }
}

/// Take an unmounted backend's handle out of the registry and close it
async fn release_client(shared: &Shared, name: &str) {
    let Some(client) = shared.registry.remove(name).await else {
        return;
    };
    if let Err(e) = client.close().await {
        warn!(backend = %name, error = %e, "Failed to close unmounted backend client");
    }
}

async fn mount_backend(
    shared: &Shared,
    name: &str,
    config: &BackendConfig,
    options: &EffectiveOptions,
) -> BackendResult<String> {
    let lookup = shared
        .registry
        .get_or_try_create(name, || shared.connector.connect(name, config))
        .await?;
    if !lookup.is_created() {
        debug!(backend = %name, "Reusing client created by a health probe");
    }
    let client = lookup.into_client();

    let route = mount_path(&shared.base_path, name);
    let server = shared
        .adapter
        .register(name, Arc::clone(&client), &route, &shared.info)?;
    server.add_to_server(&shared.info).await?;

    let handler = MiddlewareChain::for_backend(name, options).wrap(server.handler());
    shared.mux.mount(&route, handler);

    let registry = shared.registry.clone();
    let backend = name.to_string();
    shared.hooks.register(name, move || async move {
        let Some(client) = registry.remove(&backend).await else {
            return;
        };
        match client.close().await {
            Ok(()) => info!(backend = %backend, "Closed backend client"),
            Err(e) => warn!(backend = %backend, error = %e, "Failed to close backend client"),
        }
    });

    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::Router;
    use mcpx_api::AdapterServer;
    use mcpx_core::{BackendClient, BackendOptions, OperationInfo};

    struct Client(String);

    #[async_trait]
    impl BackendClient for Client {
        fn name(&self) -> &str {
            &self.0
        }

        async fn list_operations(&self) -> BackendResult<Vec<OperationInfo>> {
            Ok(vec![])
        }

        async fn close(&self) -> BackendResult<()> {
            Ok(())
        }
    }

    struct Connector;

    #[async_trait]
    impl BackendConnector for Connector {
        async fn connect(
            &self,
            name: &str,
            _config: &BackendConfig,
        ) -> BackendResult<Arc<dyn BackendClient>> {
            if name.starts_with("bad") {
                return Err(BackendError::Connect("refused".into()));
            }
            Ok(Arc::new(Client(name.to_string())))
        }
    }

    struct Server;

    #[async_trait]
    impl AdapterServer for Server {
        async fn add_to_server(&self, _info: &ServerInfo) -> BackendResult<()> {
            Ok(())
        }

        fn handler(&self) -> Router {
            Router::new()
        }
    }

    struct Adapter;

    impl BackendAdapter for Adapter {
        fn register(
            &self,
            _name: &str,
            _client: Arc<dyn BackendClient>,
            _route: &str,
            _info: &ServerInfo,
        ) -> BackendResult<Box<dyn AdapterServer>> {
            Ok(Box::new(Server))
        }
    }

    fn config(backends: &[(&str, bool)]) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.mcp_proxy.addr = "127.0.0.1:0".into();
        config.mcp_proxy.base_url = "/mcp".into();
        for (name, fatal) in backends {
            let mut backend = BackendConfig::default();
            backend.options = BackendOptions {
                panic_if_invalid: Some(*fatal),
                ..Default::default()
            };
            config.mcp_servers.insert(name.to_string(), backend);
        }
        config
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let mut config = config(&[]);
        config.mcp_proxy.base_url = "http://[::1".into();
        let result = Gateway::new(config, Arc::new(Connector), Arc::new(Adapter));
        assert!(matches!(result, Err(GatewayError::InvalidBaseUrl(_))));
    }

    #[tokio::test]
    async fn fatal_backend_aborts_before_listening() {
        let gateway = Gateway::new(
            config(&[("bad", true), ("good", false)]),
            Arc::new(Connector),
            Arc::new(Adapter),
        )
        .unwrap();
        let listening = gateway.listening();
        let state = gateway.subscribe();

        let result = gateway.run(std::future::pending()).await;
        match result {
            Err(GatewayError::BackendFatal { backend, .. }) => assert_eq!(backend, "bad"),
            other => panic!("expected fatal backend error, got {:?}", other),
        }
        assert!(listening.borrow().is_none());
        assert_eq!(*state.borrow(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn tolerated_failure_still_serves_and_stops_cleanly() {
        let gateway = Gateway::new(
            config(&[("bad", false), ("good", true)]),
            Arc::new(Connector),
            Arc::new(Adapter),
        )
        .unwrap();
        let mut listening = gateway.listening();
        let mut state = gateway.subscribe();
        let mux = gateway.mux();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let run = tokio::spawn(gateway.run(async {
            let _ = stop_rx.await;
        }));

        listening.wait_for(Option::is_some).await.unwrap();
        state
            .wait_for(|s| *s == LifecycleState::Serving)
            .await
            .unwrap();
        assert!(mux.is_mounted("/mcp/good/"));
        assert!(!mux.is_mounted("/mcp/bad/"));

        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), LifecycleState::Stopped);
    }
}
