//! Service directory seam.
//!
//! The gateway only ever asks a directory which instances of a service are
//! live. Real deployments plug a registry client in behind
//! [`ServiceDirectory`]; [`InMemoryDirectory`] covers config seeding and
//! tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One live instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub host: String,
    pub port: u16,
}

impl ServiceInstance {
    pub fn new(instance_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id: instance_id.into(),
            host: host.into(),
            port,
        }
    }

    /// `"host:port"`, the key backend connections are pooled under.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read-only view of a service registry.
#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// Live instances of `service`, in the directory's order. An unknown
    /// service yields an empty list.
    async fn list_instances(&self, service: &str) -> Vec<ServiceInstance>;
}

/// Thread-safe in-process directory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    services: DashMap<String, Vec<ServiceInstance>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `instance`, replacing any instance with the same id.
    pub fn register(&self, service: &str, instance: ServiceInstance) {
        info!(
            service,
            instance = %instance.instance_id,
            address = %instance.address(),
            "📇 Registered service instance"
        );
        let mut instances = self.services.entry(service.to_string()).or_default();
        match instances
            .iter()
            .position(|existing| existing.instance_id == instance.instance_id)
        {
            Some(index) => instances[index] = instance,
            None => instances.push(instance),
        }
    }

    /// Removes an instance. Returns `true` if it was present.
    pub fn deregister(&self, service: &str, instance_id: &str) -> bool {
        let Some(mut instances) = self.services.get_mut(service) else {
            return false;
        };
        let before = instances.len();
        instances.retain(|instance| instance.instance_id != instance_id);
        let removed = instances.len() != before;
        if removed {
            info!(service, instance = instance_id, "📇 Deregistered service instance");
        }
        removed
    }
}

#[async_trait]
impl ServiceDirectory for InMemoryDirectory {
    async fn list_instances(&self, service: &str) -> Vec<ServiceInstance> {
        self.services
            .get(service)
            .map(|instances| instances.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_replace_deregister() {
        let directory = InMemoryDirectory::new();
        assert!(directory.list_instances("game-node").await.is_empty());

        directory.register("game-node", ServiceInstance::new("n1", "10.0.0.1", 9001));
        directory.register("game-node", ServiceInstance::new("n2", "10.0.0.2", 9001));
        directory.register("game-node", ServiceInstance::new("n1", "10.0.0.9", 9100));

        let instances = directory.list_instances("game-node").await;
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].address(), "10.0.0.9:9100");
        assert_eq!(instances[1].instance_id, "n2");

        assert!(directory.deregister("game-node", "n1"));
        assert!(!directory.deregister("game-node", "n1"));
        assert!(!directory.deregister("chat", "n2"));
        assert_eq!(directory.list_instances("game-node").await.len(), 1);
    }

    #[tokio::test]
    async fn services_are_isolated() {
        let directory = InMemoryDirectory::new();
        directory.register("game-node", ServiceInstance::new("n1", "127.0.0.1", 1));
        assert!(directory.list_instances("chat-node").await.is_empty());
    }
}
