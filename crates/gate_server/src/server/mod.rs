//! Listener setup and accept loops.

mod core;

pub use self::core::GatewayServer;
