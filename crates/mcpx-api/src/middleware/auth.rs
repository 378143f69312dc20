//! Bearer token authentication middleware
//!
//! Validates `Authorization: Bearer <token>` against the backend's token
//! set. An empty set lets every request through.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};

use crate::error::ApiError;

/// Accepted bearer tokens for one backend
#[derive(Debug, Clone, Default)]
pub struct TokenSet(Arc<HashSet<String>>);

impl TokenSet {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Arc::new(tokens.into_iter().map(Into::into).collect()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }
}

/// Auth middleware state
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub(crate) backend: Arc<str>,
    pub(crate) tokens: TokenSet,
}

impl AuthContext {
    pub fn new(backend: &str, tokens: TokenSet) -> Self {
        Self {
            backend: Arc::from(backend),
            tokens,
        }
    }
}

/// Reject requests without a bearer token from the configured set.
///
/// Returns 401 before the downstream handler runs.
pub async fn require_bearer(
    State(auth): State<AuthContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if auth.tokens.is_empty() {
        return Ok(next.run(request).await);
    }

    match request.headers().typed_get::<Authorization<Bearer>>() {
        Some(header) if auth.tokens.contains(header.token().trim()) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(backend = %auth.backend, "Invalid bearer token");
            Err(ApiError::Unauthorized("Unauthorized".to_string()))
        }
        None => {
            tracing::warn!(
                backend = %auth.backend,
                path = %request.uri().path(),
                "Missing or malformed Authorization header"
            );
            Err(ApiError::Unauthorized("Unauthorized".to_string()))
        }
    }
}
