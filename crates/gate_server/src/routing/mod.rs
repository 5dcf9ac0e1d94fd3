//! Node selection: strategies, the service directory seam and the router.

pub mod directory;
pub mod router;
pub mod strategy;

pub use directory::{InMemoryDirectory, ServiceDirectory, ServiceInstance};
pub use router::NodeRouter;
pub use strategy::{
    ConsistentHash, Designated, Random, RoundRobin, RouteStrategies, RouteStrategy, StrategyKind,
};
