//! Backend collaborator traits - the seam between the gateway and a protocol client
//!
//! The gateway never speaks a backend's wire protocol itself. A
//! [`BackendConnector`] turns a backend's configuration into a connected
//! [`BackendClient`]; the client can enumerate the backend's operations and
//! be closed at shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::BackendResult;

/// An operation exposed by a backend (a "tool" in MCP terms)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Operation name, unique within one backend
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OperationInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Identity the gateway presents to backends and clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// A live, connected handle to one backend.
///
/// Handles are shared (`Arc`) between the serving path, the health reporter
/// and the shutdown hooks, so every method takes `&self`.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Name of the backend this handle is connected to
    fn name(&self) -> &str;

    /// List the operations the backend currently exposes
    async fn list_operations(&self) -> BackendResult<Vec<OperationInfo>>;

    /// Close the connection. Further calls on the handle fail.
    async fn close(&self) -> BackendResult<()>;
}

/// Creates connected clients from backend configuration.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Connect to the backend `name` described by `config`
    async fn connect(&self, name: &str, config: &BackendConfig)
        -> BackendResult<Arc<dyn BackendClient>>;
}
