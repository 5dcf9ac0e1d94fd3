//! Runtime configuration for the gateway core.
//!
//! [`GatewayConfig`] is the already-validated form handed to
//! [`crate::GatewayServer`]. The binary builds it from its TOML file; tests
//! build it directly and tweak fields.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use gate_protocol::{MessageIdTable, DEFAULT_LOGIN_MSG_ID, DEFAULT_MAX_FRAME_LENGTH, LOGIN};

use crate::routing::StrategyKind;

/// Configuration structure for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Client-facing listen address
    pub listen_addr: SocketAddr,

    /// Largest accepted frame, length field included
    pub max_frame_length: usize,

    /// Whether to use SO_REUSEPORT for multi-threaded accept loops
    pub use_reuse_port: bool,

    /// Number of accept loops with reuse-port; `None` means one per core
    pub acceptors: Option<usize>,

    /// Per-session queue of frames waiting to be written to the client
    pub outbound_queue: usize,

    pub heartbeat: HeartbeatConfig,
    pub backend: BackendConfig,
    pub routing: RoutingConfig,
    pub rate_limit: RateLimitConfig,

    /// Registered business message ids; must contain `login`
    pub messages: MessageIdTable,
}

impl GatewayConfig {
    /// Number of accept loops to run. More than one needs SO_REUSEPORT.
    pub fn acceptor_count(&self) -> usize {
        if !self.use_reuse_port {
            return 1;
        }
        match self.acceptors {
            Some(n) if n > 0 => n,
            _ => num_cpus::get(),
        }
    }

    /// Msg id that starts the login flow.
    pub fn login_msg_id(&self) -> i32 {
        self.messages.login_id().unwrap_or(DEFAULT_LOGIN_MSG_ID)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let messages = MessageIdTable::builder()
            .register(LOGIN, DEFAULT_LOGIN_MSG_ID)
            .map(|b| b.build())
            .unwrap_or_default();

        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7000)),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            use_reuse_port: false,
            acceptors: None,
            outbound_queue: 1024,
            heartbeat: HeartbeatConfig::default(),
            backend: BackendConfig::default(),
            routing: RoutingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            messages,
        }
    }
}

/// Idle periods and liveness threshold shared by both legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// No inbound traffic for this long counts as one missed heartbeat
    pub reader_idle: Duration,

    /// No outbound traffic for this long sends a heartbeat request
    pub writer_idle: Duration,

    /// Silence in both directions for this long also sends a heartbeat
    pub all_idle: Option<Duration>,

    /// Consecutive reader-idle periods before the link is closed
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            reader_idle: Duration::from_secs(60),
            writer_idle: Duration::from_secs(30),
            all_idle: None,
            max_missed: 3,
        }
    }
}

/// Backend connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    /// Upper bound on a lazy connect to a game node
    pub connect_timeout: Duration,

    /// Frames queued per backend connection before writers wait
    pub write_queue: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(5000),
            write_queue: 4096,
        }
    }
}

/// Node selection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Strategy used when a session logs in
    pub default_strategy: StrategyKind,

    /// Service name queried on the directory
    pub service_name: String,

    /// Fallback nodes, `node_id -> "host:port"`
    pub static_nodes: BTreeMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyKind::RoundRobin,
            service_name: "game-node".to_string(),
            static_nodes: BTreeMap::new(),
        }
    }
}

/// Per-session token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            refill_per_second: 50,
        }
    }
}
