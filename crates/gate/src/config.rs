//! Configuration management for the gateway binary.
//!
//! This module handles loading, validation, and conversion of the TOML
//! configuration file into the [`GatewayConfig`] consumed by the core.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use gate_protocol::{
    is_reserved_msg_id, MessageIdTable, ProtocolType, DEFAULT_LOGIN_MSG_ID,
    DEFAULT_MAX_FRAME_LENGTH, LOGIN,
};
use gate_server::{
    BackendConfig, GatewayConfig, HeartbeatConfig, RateLimitConfig, RoutingConfig,
    ServiceInstance, StrategyKind,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub heartbeat: HeartbeatSettings,
    pub backend: BackendSettings,
    pub routing: RoutingSettings,
    pub rate_limit: RateLimitSettings,
    /// Business message ids by name; `login` is required
    pub messages: BTreeMap<String, i32>,
    pub logging: LoggingSettings,
}

/// Listener and runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Client-facing address (e.g., "0.0.0.0:7000")
    pub listen_addr: String,
    /// Largest accepted frame in bytes, length field included
    pub max_frame_length: usize,
    /// Whether to use SO_REUSEPORT for multi-threaded accept loops (Linux only)
    pub use_reuse_port: bool,
    /// Runtime worker threads; defaults to twice the core count
    pub io_threads: Option<usize>,
    /// Accept loops; defaults to one, or one per core with reuse-port
    pub acceptors: Option<usize>,
    /// Frames queued per client before new ones are dropped
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7000".to_string(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            use_reuse_port: false,
            io_threads: None,
            acceptors: None,
            outbound_queue: 1024,
        }
    }
}

impl ServerSettings {
    pub fn io_threads(&self) -> usize {
        self.io_threads.unwrap_or_else(|| num_cpus::get() * 2)
    }
}

/// Idle periods in seconds. `all_idle_secs = 0` disables the combined timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub reader_idle_secs: u64,
    pub writer_idle_secs: u64,
    pub all_idle_secs: u64,
    pub max_missed: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            reader_idle_secs: 60,
            writer_idle_secs: 30,
            all_idle_secs: 0,
            max_missed: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub connect_timeout_ms: u64,
    pub write_queue: usize,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            write_queue: 4096,
        }
    }
}

/// Node selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub default_strategy: StrategyKind,
    pub service_name: String,
    /// Fallback table `node_id -> "host:port"`
    pub static_nodes: BTreeMap<String, String>,
    /// Instances seeded into the in-process service directory
    pub instances: Vec<InstanceSettings>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            default_strategy: StrategyKind::RoundRobin,
            service_name: "game-node".to_string(),
            static_nodes: BTreeMap::new(),
            instances: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSettings {
    pub instance_id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub capacity: u32,
    pub refill_per_second: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            capacity: 50,
            refill_per_second: 50,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            backend: BackendSettings::default(),
            routing: RoutingSettings::default(),
            rate_limit: RateLimitSettings::default(),
            messages: BTreeMap::from([(LOGIN.to_string(), DEFAULT_LOGIN_MSG_ID)]),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or a message describing the
    /// first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "Invalid listen address: {}",
                &self.server.listen_addr
            ));
        }

        let largest_header = ProtocolType::GameServer.header_len();
        if self.server.max_frame_length < largest_header {
            return Err(format!(
                "max_frame_length must be at least {largest_header} bytes"
            ));
        }
        if self.server.io_threads == Some(0) {
            return Err("io_threads must be positive".to_string());
        }
        if self.server.acceptors == Some(0) {
            return Err("acceptors must be positive".to_string());
        }
        if self.server.acceptors.is_some_and(|n| n > 1) && !self.server.use_reuse_port {
            return Err("More than one acceptor requires use_reuse_port".to_string());
        }
        if self.server.outbound_queue == 0 {
            return Err("outbound_queue must be positive".to_string());
        }

        if self.heartbeat.reader_idle_secs == 0 {
            return Err("reader_idle_secs must be positive".to_string());
        }
        if self.heartbeat.writer_idle_secs == 0 {
            return Err("writer_idle_secs must be positive".to_string());
        }
        if self.heartbeat.max_missed == 0 {
            return Err("max_missed must be positive".to_string());
        }

        if self.backend.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be positive".to_string());
        }
        if self.backend.write_queue == 0 {
            return Err("write_queue must be positive".to_string());
        }

        if self.rate_limit.capacity == 0 {
            return Err("rate_limit.capacity must be positive".to_string());
        }

        if !self.messages.contains_key(LOGIN) {
            return Err(format!("[messages] must define '{LOGIN}'"));
        }
        if let Some((name, id)) = self
            .messages
            .iter()
            .find(|(_, id)| is_reserved_msg_id(**id))
        {
            return Err(format!("Message '{name}' uses reserved id {id}"));
        }

        for (node_id, address) in &self.routing.static_nodes {
            if !is_host_port(address) {
                return Err(format!(
                    "Static node '{node_id}' has malformed address: {address}"
                ));
            }
        }
        for instance in &self.routing.instances {
            if instance.instance_id.is_empty() || instance.host.is_empty() {
                return Err("Routing instances need an instance_id and host".to_string());
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Converts the file settings into the core's [`GatewayConfig`].
    ///
    /// Fails on duplicate message ids, which `validate` does not check.
    pub fn to_gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        let mut builder = MessageIdTable::builder();
        for (name, id) in &self.messages {
            builder = builder.register(name.clone(), *id)?;
        }

        let all_idle = (self.heartbeat.all_idle_secs > 0)
            .then(|| Duration::from_secs(self.heartbeat.all_idle_secs));

        Ok(GatewayConfig {
            listen_addr: self
                .server
                .listen_addr
                .parse()
                .with_context(|| format!("invalid listen address {}", self.server.listen_addr))?,
            max_frame_length: self.server.max_frame_length,
            use_reuse_port: self.server.use_reuse_port,
            acceptors: self.server.acceptors,
            outbound_queue: self.server.outbound_queue,
            heartbeat: HeartbeatConfig {
                reader_idle: Duration::from_secs(self.heartbeat.reader_idle_secs),
                writer_idle: Duration::from_secs(self.heartbeat.writer_idle_secs),
                all_idle,
                max_missed: self.heartbeat.max_missed,
            },
            backend: BackendConfig {
                connect_timeout: Duration::from_millis(self.backend.connect_timeout_ms),
                write_queue: self.backend.write_queue,
            },
            routing: RoutingConfig {
                default_strategy: self.routing.default_strategy,
                service_name: self.routing.service_name.clone(),
                static_nodes: self.routing.static_nodes.clone(),
            },
            rate_limit: RateLimitConfig {
                capacity: self.rate_limit.capacity,
                refill_per_second: self.rate_limit.refill_per_second,
            },
            messages: builder.build(),
        })
    }

    /// Service instances declared under `[[routing.instances]]`.
    pub fn service_instances(&self) -> Vec<ServiceInstance> {
        self.routing
            .instances
            .iter()
            .map(|i| ServiceInstance::new(i.instance_id.clone(), i.host.clone(), i.port))
            .collect()
    }
}

/// `host:port` with a non-empty host and a numeric port.
fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
