//! mcpx-gateway - Lifecycle orchestration for the MCP gateway
//!
//! [`Gateway`] connects every configured backend concurrently, mounts the
//! ones that come up, serves them behind one listener and shuts down in
//! bounded time when its stop trigger fires:
//!
//! ```text
//! Init -> Connecting -> Serving -> ShuttingDown -> Stopped
//! ```
//!
//! Backends marked `panicIfInvalid` are awaited before the listener is
//! bound; a failure among them aborts startup. Every other backend finishes
//! connecting while the gateway is already serving.

pub mod error;
pub mod gateway;
pub mod shutdown;

pub use error::GatewayError;
pub use gateway::{ConnectOutcome, Gateway, LifecycleState};
pub use shutdown::{shutdown_signal, ShutdownHooks};
