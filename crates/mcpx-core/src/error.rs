//! Common error types for backend collaborators

use thiserror::Error;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by a backend connector, client or adapter.
///
/// The gateway treats these as opaque: it only distinguishes success from
/// failure and attaches the backend name when logging.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend configuration cannot be used by this connector
    #[error("Invalid backend config: {0}")]
    InvalidConfig(String),

    /// Connection or handshake with the backend failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Transport/communication error on an established connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with something that is not a valid response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Backend answered with an error object
    #[error("Backend error {code}: {message}")]
    Remote { code: i64, message: String },

    /// Timeout waiting for the backend
    #[error("Operation timed out")]
    Timeout,

    /// The client handle was already closed
    #[error("Client is closed")]
    Closed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Whether retrying against the same handle can succeed.
    ///
    /// The health report logs transient failures as warnings and the rest
    /// as errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Transport(_) | BackendError::Timeout | BackendError::Connect(_)
        )
    }
}
