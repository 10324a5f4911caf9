//! Cluster view used for routing

use crate::node::Node;
use crate::partition::Partitions;
use dashmap::DashMap;
use meridian_core::{Error, Result};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;

/// Read-only view of the cluster topology.
///
/// Implementations are shared between threads and refreshed externally.
pub trait Cluster: Send + Sync {
    /// Ownership table of a namespace
    fn partitions(&self, namespace: &str) -> Option<Arc<Partitions>>;

    /// All known nodes
    fn nodes(&self) -> Vec<Arc<dyn Node>>;

    /// Any active node
    fn random_node(&self) -> Result<Arc<dyn Node>> {
        let active: Vec<_> = self.nodes().into_iter().filter(|n| n.is_active()).collect();
        if active.is_empty() {
            return Err(Error::InvalidNode("cluster has no active nodes".into()));
        }
        let i = rand::thread_rng().gen_range(0..active.len());
        Ok(Arc::clone(&active[i]))
    }

    /// Racks preferred by `Replica::PreferRack`, in order
    fn rack_ids(&self) -> &[u32];
}

/// Cluster with a topology set by the caller
pub struct StaticCluster {
    nodes: RwLock<Vec<Arc<dyn Node>>>,
    partitions: DashMap<String, Arc<Partitions>>,
    rack_ids: Vec<u32>,
}

impl StaticCluster {
    /// Cluster of the given nodes with no namespaces
    pub fn new(nodes: Vec<Arc<dyn Node>>) -> Self {
        StaticCluster {
            nodes: RwLock::new(nodes),
            partitions: DashMap::new(),
            rack_ids: Vec::new(),
        }
    }

    /// Set the preferred racks
    pub fn with_rack_ids(mut self, rack_ids: Vec<u32>) -> Self {
        self.rack_ids = rack_ids;
        self
    }

    /// Replace the ownership table of a namespace
    pub fn set_partitions(&self, namespace: impl Into<String>, partitions: Partitions) {
        self.partitions.insert(namespace.into(), Arc::new(partitions));
    }

    /// Add a node
    pub fn add_node(&self, node: Arc<dyn Node>) {
        self.nodes.write().push(node);
    }
}

impl Cluster for StaticCluster {
    fn partitions(&self, namespace: &str) -> Option<Arc<Partitions>> {
        self.partitions.get(namespace).map(|p| Arc::clone(p.value()))
    }

    fn nodes(&self) -> Vec<Arc<dyn Node>> {
        self.nodes.read().clone()
    }

    fn rack_ids(&self) -> &[u32] {
        &self.rack_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNode;

    #[test]
    fn test_random_node_skips_inactive() {
        let a = Arc::new(MockNode::silent("A"));
        let b = Arc::new(MockNode::silent("B"));
        a.set_active(false);
        let nodes: Vec<Arc<dyn Node>> = vec![a, b.clone()];
        let cluster = StaticCluster::new(nodes);
        for _ in 0..5 {
            assert_eq!(cluster.random_node().unwrap().name(), "B");
        }
        b.set_active(false);
        assert!(cluster.random_node().is_err());
    }

    #[test]
    fn test_partitions_lookup() {
        let cluster = StaticCluster::new(vec![]);
        assert!(cluster.partitions("test").is_none());
        cluster.set_partitions("test", Partitions::new(2));
        assert_eq!(cluster.partitions("test").unwrap().replica_count(), 2);
    }
}
