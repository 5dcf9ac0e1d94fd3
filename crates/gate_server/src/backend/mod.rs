//! Backend connection multiplexing and reply correlation.

pub mod channel;
mod dispatch;
mod manager;
pub mod pending;

pub use channel::BackendChannel;
pub use dispatch::{Dispatch, ResponseInterceptor};
pub use manager::BackendManager;
pub use pending::{PendingKey, PendingRequests};
