//! # Gate Server
//!
//! Session-aware TCP gateway for a cluster of game nodes.
//!
//! The gateway terminates client connections speaking the client frame
//! layout, routes each session to one game node, and multiplexes every
//! session bound to a node over a single backend connection using the
//! internal layout. Both legs keep themselves alive with reserved
//! heartbeat frames that never reach business code.
//!
//! ## Components
//!
//! * [`session`] - per-client state, token-bucket rate limiting, registry
//! * [`routing`] - strategies, service directory seam, sticky node router
//! * [`backend`] - lazy per-node connections and reply correlation
//! * [`frontend`] - per-connection task and frame classification
//! * [`link`] - idle timers and heartbeat handling shared by both legs
//! * [`GatewayServer`] - composition root and accept loops
//!
//! ## Message Flow
//!
//! 1. Client connects; a session is created in the `Connected` state
//! 2. The login frame picks a node with the default strategy and is forwarded
//! 3. The node's reply is matched to the session by `session_id:seq` and
//!    delivered with the original msg id and seq
//! 4. Business code marks the session authenticated (usually through a
//!    [`ResponseInterceptor`]); later frames follow the bound node
//! 5. On disconnect, pending requests and the session are dropped
//!
//! ## Error Handling
//!
//! * Framing violations close the offending connection
//! * No available node is reported as `None`, the connection stays open
//! * [`BackendError`] fails one forward attempt only
//! * Replies without a pending entry or session are logged and dropped

pub mod backend;
pub mod config;
pub mod error;
pub mod frontend;
pub mod link;
pub mod routing;
pub mod server;
pub mod session;

pub use backend::{BackendManager, ResponseInterceptor};
pub use config::{
    BackendConfig, GatewayConfig, HeartbeatConfig, RateLimitConfig, RoutingConfig,
};
pub use error::{BackendError, GatewayError};
pub use routing::{InMemoryDirectory, NodeRouter, ServiceDirectory, ServiceInstance, StrategyKind};
pub use server::GatewayServer;
pub use session::{Session, SessionId, SessionRegistry, SessionState};
