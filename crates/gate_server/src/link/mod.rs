//! Link layer shared by both legs: idle detection and heartbeats.

pub mod idle;
pub mod monitor;

pub use idle::{IdleEvent, IdleTimers};
pub use monitor::{IdleAction, Inbound, LinkMonitor, Liveness};
