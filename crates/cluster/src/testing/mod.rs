//! Test doubles for nodes and the server side of the protocol
//!
//! Exposed to every crate of the workspace so that command, batch and
//! transaction tests can run against scripted nodes without a live cluster.

mod mock;
mod server;

pub use mock::{MockNode, Reply};
pub use server::{MemoryServer, StoredRecord, UdfFn};

use crate::cluster::StaticCluster;
use crate::node::Node;
use crate::partition::Partitions;
use std::sync::Arc;

/// Cluster where `master` owns every partition of `namespace` and
/// `replicas` follow in order.
pub fn single_owner_cluster(
    namespace: &str,
    master: Arc<MockNode>,
    replicas: &[Arc<MockNode>],
) -> StaticCluster {
    let mut owners: Vec<Arc<dyn Node>> = vec![master as Arc<dyn Node>];
    owners.extend(replicas.iter().map(|n| Arc::clone(n) as Arc<dyn Node>));
    let cluster = StaticCluster::new(owners.clone());
    let count = owners.len();
    cluster.set_partitions(
        namespace,
        Partitions::from_fn(count, |_| owners.clone()),
    );
    cluster
}
