//! Gateway error types

use std::time::Duration;

use mcpx_core::{BackendError, ConfigError, RoutingError};
use thiserror::Error;

/// Fatal startup, serve and shutdown outcomes.
///
/// A clean shutdown is `Ok(())`, never an error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    InvalidBaseUrl(#[from] RoutingError),

    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend '{backend}' failed to initialize: {source}")]
    BackendFatal {
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error("Startup task failed: {0}")]
    Task(String),

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}
