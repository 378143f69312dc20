//! mcpx-proxy - Concrete backend collaborators for the MCP gateway
//!
//! Speaks MCP's streamable-HTTP transport: JSON-RPC 2.0 over HTTP POST,
//! with responses delivered either as a JSON body or as a server-sent event
//! stream.
//!
//! - [`HttpConnector`] connects to a backend's `url`, performs the
//!   `initialize` handshake and yields an [`HttpClient`].
//! - [`HttpAdapter`] exposes a connected backend under its mount path by
//!   forwarding requests to the backend URL.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcpx_proxy::{HttpAdapter, HttpConnector};
//!
//! let connector = Arc::new(HttpConnector::new(config.mcp_proxy.server_info()));
//! let adapter = Arc::new(HttpAdapter::new(config.mcp_servers.clone())?);
//! let gateway = Gateway::new(config, connector, adapter)?;
//! ```
//!
//! # Testing
//!
//! The `testing` module provides a scripted MCP backend and a
//! self-stopping test server:
//!
//! ```rust,ignore
//! use mcpx_proxy::testing::{MockMcp, TestServer};
//!
//! let backend = MockMcp::new(["forecast"]);
//! let server = TestServer::start(backend.router()).await?;
//! ```

pub mod adapter;
pub mod client;
pub mod error;
pub mod sse;
pub mod testing;
pub mod types;

pub use adapter::{HttpAdapter, HttpAdapterServer};
pub use client::{HttpClient, HttpConnector, SESSION_HEADER};
pub use error::{ProxyError, Result};
