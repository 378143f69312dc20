//! Request logging

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use mcpx_core::LogLevel;

/// Per-backend logging context
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub(crate) backend: Arc<str>,
    pub(crate) level: LogLevel,
}

impl RequestLog {
    pub fn new(backend: &str, level: LogLevel) -> Self {
        Self {
            backend: Arc::from(backend),
            level,
        }
    }
}

/// Log method and path of every request at the backend's configured level
pub async fn log_request(State(log): State<RequestLog>, request: Request, next: Next) -> Response {
    let method = request.method();
    let path = request.uri().path();
    let backend = &*log.backend;

    match log.level {
        LogLevel::Trace => tracing::trace!(backend, %method, path, "Request"),
        LogLevel::Debug => tracing::debug!(backend, %method, path, "Request"),
        LogLevel::Info => tracing::info!(backend, %method, path, "Request"),
        LogLevel::Warn => tracing::warn!(backend, %method, path, "Request"),
        LogLevel::Error => tracing::error!(backend, %method, path, "Request"),
    }

    next.run(request).await
}
