//! Per-backend middleware chain
//!
//! A [`MiddlewareChain`] is an ordered list of [`Middleware`]. The first
//! entry is the outermost wrapper: it sees the request first and the
//! response last. [`MiddlewareChain::for_backend`] always builds
//! recovery, then logging (if enabled), then auth (if tokens are set), so a
//! panic anywhere below recovery is always caught.

pub mod auth;
pub mod logging;
pub mod recover;

use axum::Router;
use mcpx_core::{EffectiveOptions, LogLevel};

pub use auth::{require_bearer, AuthContext, TokenSet};
pub use logging::{log_request, RequestLog};
pub use recover::{recover_layer, PANIC_MESSAGE};

/// One request interceptor
#[derive(Debug, Clone)]
pub enum Middleware {
    /// Convert panics into a generic 500
    Recover,
    /// Log method and path at the given level
    Log(LogLevel),
    /// Require a bearer token from the set
    Auth(TokenSet),
}

impl Middleware {
    fn apply(&self, backend: &str, router: Router) -> Router {
        match self {
            Middleware::Recover => router.layer(recover_layer(backend)),
            Middleware::Log(level) => router.layer(axum::middleware::from_fn_with_state(
                RequestLog::new(backend, *level),
                log_request,
            )),
            Middleware::Auth(tokens) => router.layer(axum::middleware::from_fn_with_state(
                AuthContext::new(backend, tokens.clone()),
                require_bearer,
            )),
        }
    }
}

/// Ordered middleware list for one backend
#[derive(Debug, Clone)]
pub struct MiddlewareChain {
    backend: String,
    middlewares: Vec<Middleware>,
}

impl MiddlewareChain {
    /// Empty chain; [`wrap`](Self::wrap) returns the handler unchanged
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            middlewares: Vec::new(),
        }
    }

    /// Chain derived from a backend's resolved options
    pub fn for_backend(backend: impl Into<String>, options: &EffectiveOptions) -> Self {
        let mut chain = Self::new(backend).with(Middleware::Recover);
        if options.log_enabled {
            chain = chain.with(Middleware::Log(options.log_level));
        }
        if !options.auth_tokens.is_empty() {
            chain = chain.with(Middleware::Auth(TokenSet::new(options.auth_tokens.iter().cloned())));
        }
        chain
    }

    /// Append `middleware` inside everything already in the chain
    pub fn with(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn middlewares(&self) -> &[Middleware] {
        &self.middlewares
    }

    /// Wrap `handler` so the first middleware ends up outermost
    pub fn wrap(&self, handler: Router) -> Router {
        // Each `layer` call wraps everything applied before it
        self.middlewares
            .iter()
            .rev()
            .fold(handler, |router, middleware| middleware.apply(&self.backend, router))
    }
}
