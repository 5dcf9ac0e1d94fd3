//! Client sessions: state, rate limiting and the registry that owns them.

mod client;
pub mod rate_limit;
mod registry;

pub use client::{Session, SessionId, SessionState};
pub use rate_limit::TokenBucket;
pub use registry::SessionRegistry;
