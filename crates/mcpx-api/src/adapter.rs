//! Backend adapter contract
//!
//! An adapter exposes a connected backend client over HTTP. The gateway
//! calls [`BackendAdapter::register`] once per backend, then
//! [`AdapterServer::add_to_server`] to publish the backend's operations, and
//! finally mounts [`AdapterServer::handler`] under the backend's prefix.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use mcpx_core::{BackendClient, BackendResult, ServerInfo};

/// Builds HTTP-facing servers for connected backends
pub trait BackendAdapter: Send + Sync {
    /// Wrap `client` for backend `name`, to be mounted at `route`.
    ///
    /// `route` is the full mount path; the handler receives request paths
    /// that still carry it.
    fn register(
        &self,
        name: &str,
        client: Arc<dyn BackendClient>,
        route: &str,
        info: &ServerInfo,
    ) -> BackendResult<Box<dyn AdapterServer>>;
}

/// One backend's HTTP-facing server
#[async_trait]
pub trait AdapterServer: Send + Sync {
    /// Publish the backend's operations. Called once, before mounting.
    async fn add_to_server(&self, info: &ServerInfo) -> BackendResult<()>;

    /// Request handler to mount under the backend's prefix
    fn handler(&self) -> Router;
}
