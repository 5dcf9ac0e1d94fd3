//! Resolves sessions to game-node addresses.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::RoutingConfig;
use crate::session::Session;
use super::directory::{ServiceDirectory, ServiceInstance};
use super::strategy::{RouteStrategies, StrategyKind};

/// Chooses the node a session talks to and keeps that choice sticky.
///
/// Candidates come from the service directory first. When it has no live
/// instances (or there is no directory) the static node table is used,
/// ordered by node id.
pub struct NodeRouter {
    directory: Option<Arc<dyn ServiceDirectory>>,
    service_name: String,
    strategies: RouteStrategies,
    static_nodes: DashMap<String, String>,
}

impl NodeRouter {
    pub fn new(
        service_name: impl Into<String>,
        directory: Option<Arc<dyn ServiceDirectory>>,
        strategies: RouteStrategies,
    ) -> Self {
        Self {
            directory,
            service_name: service_name.into(),
            strategies,
            static_nodes: DashMap::new(),
        }
    }

    /// Builds a router and loads the configured static nodes.
    pub fn from_config(
        config: &RoutingConfig,
        directory: Option<Arc<dyn ServiceDirectory>>,
        strategies: RouteStrategies,
    ) -> Self {
        let router = Self::new(config.service_name.clone(), directory, strategies);
        for (node_id, address) in &config.static_nodes {
            router.add_static_node(node_id.clone(), address.clone());
        }
        router
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Address of the node `session` should talk to.
    ///
    /// A session that already has a node keeps it, and this returns that
    /// node's current address. Otherwise a node is picked with `kind` and
    /// bound to the session before its address is returned.
    ///
    /// # Returns
    ///
    /// `None` when no node is available from either source.
    pub async fn select_node(&self, session: &Session, kind: StrategyKind) -> Option<String> {
        if let Some(node_id) = session.node_id() {
            return self.node_address(node_id).await;
        }

        let strategy = self.strategies.get(kind);
        let player_id = session.player_id();

        let instances = self.available_nodes().await;
        if !instances.is_empty() {
            let selected = strategy.choose(&instances, player_id)?;
            return self.bind(session, &selected.instance_id, selected.address(), kind).await;
        }

        let static_nodes = self.sorted_static_nodes();
        if static_nodes.is_empty() {
            warn!(session_id = session.id(), "No available nodes for routing");
            return None;
        }
        let (node_id, address) = strategy.choose_node_id(&static_nodes, player_id)?;
        self.bind(session, node_id, address.clone(), kind).await
    }

    /// Current address of `node_id`, checking the directory before the
    /// static table.
    pub async fn node_address(&self, node_id: &str) -> Option<String> {
        if let Some(instance) = self
            .available_nodes()
            .await
            .into_iter()
            .find(|instance| instance.instance_id == node_id)
        {
            return Some(instance.address());
        }
        self.static_nodes
            .get(node_id)
            .map(|entry| entry.value().clone())
    }

    pub fn add_static_node(&self, node_id: impl Into<String>, address: impl Into<String>) {
        let node_id = node_id.into();
        let address = address.into();
        info!(node = %node_id, %address, "➕ Added static node");
        self.static_nodes.insert(node_id, address);
    }

    pub fn remove_static_node(&self, node_id: &str) -> Option<String> {
        let removed = self.static_nodes.remove(node_id).map(|(_, address)| address);
        if removed.is_some() {
            info!(node = node_id, "➖ Removed static node");
        }
        removed
    }

    /// Snapshot of the static node table.
    pub fn static_nodes(&self) -> BTreeMap<String, String> {
        self.static_nodes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    async fn bind(
        &self,
        session: &Session,
        node_id: &str,
        address: String,
        kind: StrategyKind,
    ) -> Option<String> {
        if !session.bind_node(node_id) {
            // bound in the meantime; the first binding wins
            let bound = session.node_id()?;
            return self.node_address(bound).await;
        }
        debug!(
            session_id = session.id(),
            node = node_id,
            strategy = %kind,
            "Selected node"
        );
        Some(address)
    }

    async fn available_nodes(&self) -> Vec<ServiceInstance> {
        match &self.directory {
            Some(directory) => directory.list_instances(&self.service_name).await,
            None => Vec::new(),
        }
    }

    fn sorted_static_nodes(&self) -> Vec<(String, String)> {
        let mut nodes: Vec<(String, String)> = self
            .static_nodes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        nodes
    }
}

impl std::fmt::Debug for NodeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRouter")
            .field("service_name", &self.service_name)
            .field("has_directory", &self.directory.is_some())
            .field("static_nodes", &self.static_nodes.len())
            .finish()
    }
}
