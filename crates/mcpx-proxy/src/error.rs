//! Error types for the HTTP collaborators

use mcpx_core::BackendError;
use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur while talking to a backend over HTTP
#[derive(Error, Debug)]
pub enum ProxyError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Backend configuration cannot be used
    #[error("Invalid backend config: {0}")]
    InvalidConfig(String),

    /// Backend answered with a non-success HTTP status
    #[error("Server error {status}: {message}")]
    Status { status: u16, message: String },

    /// Backend answered with a JSON-RPC error object
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The client was closed
    #[error("Client is closed")]
    Closed,
}

impl ProxyError {
    /// Create a status error from status code and message
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Parse(err.to_string())
    }
}

impl From<ProxyError> for BackendError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Http(e) if e.is_timeout() => BackendError::Timeout,
            ProxyError::Http(e) if e.is_connect() => BackendError::Connect(e.to_string()),
            ProxyError::Http(e) => BackendError::Transport(e.to_string()),
            ProxyError::InvalidUrl(e) => BackendError::InvalidConfig(e.to_string()),
            ProxyError::InvalidConfig(msg) => BackendError::InvalidConfig(msg),
            ProxyError::Status { status, message } => {
                BackendError::Transport(format!("HTTP {}: {}", status, message))
            }
            ProxyError::Rpc { code, message } => BackendError::Remote { code, message },
            ProxyError::Parse(msg) => BackendError::Protocol(msg),
            ProxyError::Closed => BackendError::Closed,
        }
    }
}
