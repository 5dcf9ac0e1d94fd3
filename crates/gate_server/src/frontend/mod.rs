//! Client-facing side of the gateway.

pub mod connection;
pub mod handler;

pub use connection::{handle_connection, CloseReason, ConnectionSettings};
pub use handler::{FrameOutcome, FrontendHandler};
