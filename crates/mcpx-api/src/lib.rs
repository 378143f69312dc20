//! mcpx-api - HTTP surface of the MCP gateway
//!
//! This crate turns connected backends into routes on a single HTTP
//! listener. Each backend's handler comes from a [`BackendAdapter`], is
//! wrapped by a per-backend [`MiddlewareChain`] (panic recovery, request
//! logging, bearer auth) and mounted on the shared [`Mux`] under its
//! prefix. The unauthenticated health check is mounted on the same mux.
//!
//! # Usage
//!
//! ```ignore
//! use mcpx_api::{health_router, HealthState, MiddlewareChain, Mux};
//!
//! let mux = Mux::new();
//! mux.mount(HEALTH_PATH, health_router(health_state));
//! mux.mount("/mcp/weather/", MiddlewareChain::for_backend("weather", &options).wrap(handler));
//! axum::serve(listener, mux.into_router()).await?;
//! ```

pub mod adapter;
pub mod error;
pub mod health;
pub mod middleware;
pub mod mux;
pub mod state;

pub use adapter::{AdapterServer, BackendAdapter};
pub use error::ApiError;
pub use health::{format_uptime, health_router, HealthEntry, HealthReport, HEALTH_PATH};
pub use middleware::{Middleware, MiddlewareChain};
pub use mux::Mux;
pub use state::HealthState;
