//! Prefix multiplexer
//!
//! Routes each request to the handler mounted at the longest prefix of its
//! path. Paths with `.`, `..` or empty segments are redirected to their
//! cleaned form first, so a prefix match always sees the canonical path
//! and cannot reach another backend's handler around its middleware.
//! Backends connect concurrently with serving, so handlers can be
//! mounted while requests are in flight; the table lock is only held for
//! lookup and insert, never across a request.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use mcpx_core::clean_path;
use parking_lot::RwLock;
use tower::ServiceExt;

use crate::error::ApiError;

enum Resolved {
    Handler(Router),
    Redirect(String),
    NotFound,
}

/// Shared route table
#[derive(Clone, Default)]
pub struct Mux {
    routes: Arc<RwLock<BTreeMap<String, Router>>>,
}

impl Mux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `handler` at `prefix`. A second mount at the same prefix
    /// replaces the first.
    pub fn mount(&self, prefix: &str, handler: Router) {
        let previous = self.routes.write().insert(prefix.to_string(), handler);
        if previous.is_some() {
            tracing::warn!(prefix, "Replacing handler already mounted at prefix");
        } else {
            tracing::debug!(prefix, "Mounted handler");
        }
    }

    pub fn is_mounted(&self, prefix: &str) -> bool {
        self.routes.read().contains_key(prefix)
    }

    /// Mounted prefixes, sorted
    pub fn prefixes(&self) -> Vec<String> {
        self.routes.read().keys().cloned().collect()
    }

    fn resolve(&self, path: &str) -> Resolved {
        let cleaned = clean_path(path);
        if cleaned != path {
            return Resolved::Redirect(cleaned);
        }

        let routes = self.routes.read();

        if !path.ends_with('/') {
            let subtree = format!("{}/", path);
            if routes.contains_key(&subtree) {
                return Resolved::Redirect(subtree);
            }
        }

        routes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, router)| Resolved::Handler(router.clone()))
            .unwrap_or(Resolved::NotFound)
    }

    /// Router that dispatches every request through this table
    pub fn into_router(self) -> Router {
        Router::new().fallback(dispatch).with_state(self)
    }
}

async fn dispatch(State(mux): State<Mux>, request: Request) -> Response {
    match mux.resolve(request.uri().path()) {
        Resolved::Handler(router) => match router.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        },
        Resolved::Redirect(mut location) => {
            if let Some(query) = request.uri().query() {
                location.push('?');
                location.push_str(query);
            }
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
        Resolved::NotFound => {
            ApiError::NotFound(format!("No route for {}", request.uri().path())).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;

    fn echo(tag: &'static str) -> Router {
        Router::new().fallback(move || async move { tag })
    }

    async fn get_path(router: Router, path: &str) -> Response {
        router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let mux = Mux::new();
        mux.mount("/mcp/", echo("root"));
        mux.mount("/mcp/weather/", echo("weather"));
        let router = mux.into_router();

        let response = get_path(router.clone(), "/mcp/weather/sse").await;
        assert_eq!(body_text(response).await, "weather");

        let response = get_path(router, "/mcp/other/").await;
        assert_eq!(body_text(response).await, "root");
    }

    #[tokio::test]
    async fn unmatched_path_is_404() {
        let mux = Mux::new();
        mux.mount("/mcp/weather/", echo("weather"));

        let response = get_path(mux.into_router(), "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_trailing_slash_redirects() {
        let mux = Mux::new();
        mux.mount("/mcp/weather/", echo("weather"));

        let response = get_path(mux.into_router(), "/mcp/weather?x=1").await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/mcp/weather/?x=1");
    }

    #[tokio::test]
    async fn mount_after_router_is_built() {
        let mux = Mux::new();
        let router = mux.clone().into_router();

        let response = get_path(router.clone(), "/late/x").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        mux.mount(
            "/late/",
            Router::new().route("/late/x", get(|| async { "late" })),
        );
        let response = get_path(router, "/late/x").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "late");
        assert_eq!(mux.prefixes(), vec!["/late/".to_string()]);
    }

    #[tokio::test]
    async fn dot_segments_redirect_to_clean_path() {
        let mux = Mux::new();
        mux.mount("/mcp/public/", echo("public"));
        mux.mount("/mcp/private/", echo("private"));
        let router = mux.into_router();

        let response = get_path(router.clone(), "/mcp/public/../private/x?y=2").await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/mcp/private/x?y=2");

        let response = get_path(router.clone(), "/mcp//public/./sse").await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/mcp/public/sse");

        let response = get_path(router, "/mcp/public/sse").await;
        assert_eq!(body_text(response).await, "public");
    }
}
