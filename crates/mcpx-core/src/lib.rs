//! mcpx-core - Core contracts and shared state for the MCP gateway
//!
//! This crate provides the abstractions the gateway is built on: the
//! collaborator traits that connect to a backend and list its operations,
//! the configuration model with per-backend option inheritance, the
//! mount-path helpers, and the [`Registry`] of live backend clients that is
//! shared between startup, health probes and shutdown.

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod routing;

pub use backend::{BackendClient, BackendConnector, OperationInfo, ServerInfo};
pub use config::{
    BackendConfig, BackendOptions, ConfigError, EffectiveOptions, GatewaySettings, LogLevel,
    ProxyConfig,
};
pub use error::{BackendError, BackendResult};
pub use models::{BackendHealth, HealthStatus};
pub use registry::{Lookup, Registry};
pub use routing::{base_path, clean_path, mount_path, RoutingError};
