//! Health check state

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mcpx_core::{BackendConfig, BackendConnector, Registry};
use parking_lot::RwLock;

/// State shared by health check requests
#[derive(Clone)]
pub struct HealthState {
    pub(crate) registry: Registry,
    pub(crate) connector: Arc<dyn BackendConnector>,
    pub(crate) backends: Arc<BTreeMap<String, BackendConfig>>,
    pub(crate) started_at: Instant,
    pub(crate) probe_timeout: Duration,
    failures: Arc<RwLock<HashMap<String, String>>>,
}

impl HealthState {
    /// Report on `backends`, creating missing handles through `connector`
    pub fn new(
        registry: Registry,
        connector: Arc<dyn BackendConnector>,
        backends: BTreeMap<String, BackendConfig>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            backends: Arc::new(backends),
            started_at: Instant::now(),
            probe_timeout,
            failures: Arc::default(),
        }
    }

    /// Measure uptime from `started_at` instead of construction time
    pub fn with_started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Report `name` as failed from now on, without contacting it.
    ///
    /// Startup calls this for backends it gave up on and left unmounted.
    pub fn record_failure(&self, name: &str, message: impl Into<String>) {
        self.failures.write().insert(name.to_string(), message.into());
    }

    pub(crate) fn failure(&self, name: &str) -> Option<String> {
        self.failures.read().get(name).cloned()
    }
}
