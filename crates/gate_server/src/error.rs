//! Error types for the gateway core.
//!
//! Routing failure is not an error: [`crate::routing::NodeRouter`] returns
//! `None` when no node is available and the caller decides what to do.

use thiserror::Error;

/// Server-level failures raised while starting or running the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single forward attempt to a game node.
///
/// These never affect the client connection; the frontend logs them and
/// keeps the session open.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid node address '{0}'")]
    InvalidAddress(String),
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },
    #[error("backend {0} is shutting down")]
    Unavailable(String),
    #[error("write to {addr} failed: {reason}")]
    Write { addr: String, reason: String },
    #[error("backend connection to {0} closed")]
    Closed(String),
}
