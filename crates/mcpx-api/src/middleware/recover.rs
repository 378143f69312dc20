//! Panic recovery
//!
//! Converts a panic anywhere below this layer into a generic 500. The panic
//! payload is logged with the backend name and never reaches the client.

use std::any::Any;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Response;
use axum::response::IntoResponse;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};

use crate::error::ApiError;

/// Generic body sent for every recovered panic
pub const PANIC_MESSAGE: &str = "Internal Server Error";

/// Builds the 500 response for a recovered panic
#[derive(Debug, Clone)]
pub struct PanicResponder {
    backend: Arc<str>,
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        let detail = if let Some(s) = err.downcast_ref::<String>() {
            s.as_str()
        } else if let Some(s) = err.downcast_ref::<&str>() {
            s
        } else {
            "non-string panic payload"
        };
        tracing::error!(backend = %self.backend, panic = %detail, "Recovered from panic while handling request");

        ApiError::Internal(PANIC_MESSAGE.to_string()).into_response()
    }
}

/// Recovery layer for `backend`
pub fn recover_layer(backend: &str) -> CatchPanicLayer<PanicResponder> {
    CatchPanicLayer::custom(PanicResponder {
        backend: Arc::from(backend),
    })
}
