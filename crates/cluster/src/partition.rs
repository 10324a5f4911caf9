//! Partition ownership and replica sequencing
//!
//! [`Partitions`] is the per-namespace ownership table maintained by the
//! cluster. [`Partition`] is the routing state of one command: which
//! partition the key lives in and which replica the next attempt targets.
//!
//! ## Sequencing
//!
//! A retry moves to the next replica by advancing `sequence`. The advance is
//! applied at most once per node selection: `prepare_retry_*` only advances
//! when the current sequence has been used to pick a node since the last
//! advance. Repeated calls without an intervening selection are no-ops.

use crate::cluster::Cluster;
use crate::node::Node;
use meridian_core::{Error, Key, ReadModeSc, Replica, Result, PARTITIONS};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static MASTER_PROLES_INDEX: AtomicUsize = AtomicUsize::new(0);

/// Ownership table of one namespace
#[derive(Debug, Clone)]
pub struct Partitions {
    /// `replicas[r][p]` holds replica `r` of partition `p`; index 0 is the master
    pub replicas: Vec<Vec<Option<Arc<dyn Node>>>>,
    /// Namespace runs in strong-consistency mode
    pub sc_mode: bool,
}

impl Partitions {
    /// Empty table with `replica_count` copies per partition
    pub fn new(replica_count: usize) -> Self {
        Partitions {
            replicas: (0..replica_count.max(1))
                .map(|_| vec![None; PARTITIONS as usize])
                .collect(),
            sc_mode: false,
        }
    }

    /// Table built by asking `owners` for the replica list of each partition
    pub fn from_fn<F>(replica_count: usize, owners: F) -> Self
    where
        F: Fn(u32) -> Vec<Arc<dyn Node>>,
    {
        let mut table = Partitions::new(replica_count);
        for pid in 0..PARTITIONS {
            for (r, node) in owners(pid).into_iter().enumerate().take(table.replicas.len()) {
                table.replicas[r][pid as usize] = Some(node);
            }
        }
        table
    }

    /// Number of replicas per partition
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Node holding replica `r` of partition `pid`
    pub fn node(&self, pid: u32, r: usize) -> Option<&Arc<dyn Node>> {
        self.replicas.get(r)?.get(pid as usize)?.as_ref()
    }
}

/// Routing state of one command
#[derive(Debug, Clone)]
pub struct Partition {
    namespace: String,
    partition_id: u32,
    replica: Replica,
    linearize: bool,
    sequence: usize,
    used: bool,
}

impl Partition {
    /// Routing for a read
    pub fn read(cluster: &dyn Cluster, key: &Key, replica: Replica, mode: ReadModeSc) -> Self {
        let sc_mode = cluster
            .partitions(key.namespace())
            .map(|p| p.sc_mode)
            .unwrap_or(false);
        let (replica, linearize) = if sc_mode {
            match mode {
                ReadModeSc::Session => (Replica::Master, false),
                ReadModeSc::Linearize => {
                    let r = if replica == Replica::PreferRack {
                        Replica::Sequence
                    } else {
                        replica
                    };
                    (r, true)
                }
                _ => (replica, false),
            }
        } else {
            (replica, false)
        };
        Partition::new(key, replica, linearize)
    }

    /// Routing for a write
    pub fn write(key: &Key, replica: Replica) -> Self {
        Partition::new(key, replica, false)
    }

    fn new(key: &Key, replica: Replica, linearize: bool) -> Self {
        Partition {
            namespace: key.namespace().to_string(),
            partition_id: key.partition_id(),
            replica,
            linearize,
            sequence: 0,
            used: false,
        }
    }

    /// Start at replica position `sequence`.
    ///
    /// Batch retries regroup keys from scratch and carry the sequence over
    /// this way.
    pub fn with_sequence(mut self, sequence: usize) -> Self {
        self.sequence = sequence;
        self
    }

    /// Partition id
    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// Namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Current sequence (retry position)
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// Node for a read under the replica policy
    pub fn node_read(&mut self, cluster: &dyn Cluster) -> Result<Arc<dyn Node>> {
        let table = self.table(cluster)?;
        let node = match self.replica {
            Replica::Master => self.master_node(&table),
            Replica::MasterProles => self.master_proles_node(&table),
            Replica::Sequence => self.sequence_node(&table),
            Replica::PreferRack => self.rack_node(cluster, &table),
            Replica::Random => self.random_node(&table),
        }?;
        self.used = true;
        Ok(node)
    }

    /// Node for a write: the master, or the sequence for sequence-style policies
    pub fn node_write(&mut self, cluster: &dyn Cluster) -> Result<Arc<dyn Node>> {
        let table = self.table(cluster)?;
        let node = match self.replica {
            Replica::Sequence | Replica::PreferRack => self.sequence_node(&table),
            _ => self.master_node(&table),
        }?;
        self.used = true;
        Ok(node)
    }

    /// Prepare the next read attempt.
    ///
    /// Linearized reads stay on the same replica after a timeout.
    pub fn prepare_retry_read(&mut self, is_timeout: bool) {
        if !is_timeout || !self.linearize {
            self.advance();
        }
    }

    /// Prepare the next write attempt. Timeouts keep the replica.
    pub fn prepare_retry_write(&mut self, is_timeout: bool) {
        if !is_timeout {
            self.advance();
        }
    }

    fn advance(&mut self) {
        if self.used {
            self.sequence = self.sequence.wrapping_add(1);
            self.used = false;
        }
    }

    fn table(&self, cluster: &dyn Cluster) -> Result<Arc<Partitions>> {
        cluster.partitions(&self.namespace).ok_or_else(|| {
            Error::InvalidNode(format!("namespace '{}' not found in partition map", self.namespace))
        })
    }

    fn no_node(&self) -> Error {
        Error::InvalidNode(format!(
            "no active node for partition {}:{} (replica {:?}, sequence {})",
            self.namespace, self.partition_id, self.replica, self.sequence
        ))
    }

    fn master_node(&self, table: &Partitions) -> Result<Arc<dyn Node>> {
        match table.node(self.partition_id, 0) {
            Some(node) if node.is_active() => Ok(Arc::clone(node)),
            _ => Err(self.no_node()),
        }
    }

    fn master_proles_node(&self, table: &Partitions) -> Result<Arc<dyn Node>> {
        let n = table.replica_count();
        for _ in 0..n {
            let r = MASTER_PROLES_INDEX.fetch_add(1, Ordering::Relaxed) % n;
            if let Some(node) = table.node(self.partition_id, r) {
                if node.is_active() {
                    return Ok(Arc::clone(node));
                }
            }
        }
        Err(self.no_node())
    }

    fn sequence_node(&mut self, table: &Partitions) -> Result<Arc<dyn Node>> {
        let n = table.replica_count();
        for _ in 0..n {
            let r = self.sequence % n;
            if let Some(node) = table.node(self.partition_id, r) {
                if node.is_active() {
                    return Ok(Arc::clone(node));
                }
            }
            self.sequence = self.sequence.wrapping_add(1);
        }
        Err(self.no_node())
    }

    fn rack_node(&mut self, cluster: &dyn Cluster, table: &Partitions) -> Result<Arc<dyn Node>> {
        let n = table.replica_count();
        for rack in cluster.rack_ids() {
            for step in 0..n {
                let seq = self.sequence.wrapping_add(step);
                if let Some(node) = table.node(self.partition_id, seq % n) {
                    if node.is_active() && node.rack_id(&self.namespace) == Some(*rack) {
                        self.sequence = seq;
                        return Ok(Arc::clone(node));
                    }
                }
            }
        }
        self.sequence_node(table)
    }

    fn random_node(&self, table: &Partitions) -> Result<Arc<dyn Node>> {
        let n = table.replica_count();
        if n == 0 {
            return Err(self.no_node());
        }
        let start = rand::thread_rng().gen_range(0..n);
        for step in 0..n {
            if let Some(node) = table.node(self.partition_id, (start + step) % n) {
                if node.is_active() {
                    return Ok(Arc::clone(node));
                }
            }
        }
        Err(self.no_node())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::StaticCluster;
    use crate::testing::MockNode;
    use proptest::prelude::*;

    fn cluster3() -> (StaticCluster, Vec<Arc<MockNode>>) {
        let nodes: Vec<Arc<MockNode>> = ["A", "B", "C"]
            .iter()
            .map(|n| Arc::new(MockNode::silent(n)))
            .collect();
        let dyn_nodes: Vec<Arc<dyn Node>> =
            nodes.iter().map(|n| Arc::clone(n) as Arc<dyn Node>).collect();
        let cluster = StaticCluster::new(dyn_nodes.clone());
        cluster.set_partitions("test", Partitions::from_fn(3, |_| dyn_nodes.clone()));
        (cluster, nodes)
    }

    fn key() -> Key {
        Key::new("test", "s", "k").unwrap()
    }

    #[test]
    fn test_sequence_moves_to_next_replica() {
        let (cluster, _) = cluster3();
        let mut p = Partition::read(&cluster, &key(), Replica::Sequence, ReadModeSc::Session);
        assert_eq!(p.node_read(&cluster).unwrap().name(), "A");
        p.prepare_retry_read(false);
        assert_eq!(p.node_read(&cluster).unwrap().name(), "B");
        p.prepare_retry_read(false);
        assert_eq!(p.node_read(&cluster).unwrap().name(), "C");
        p.prepare_retry_read(false);
        assert_eq!(p.node_read(&cluster).unwrap().name(), "A");
    }

    #[test]
    fn test_no_double_advance() {
        let (cluster, _) = cluster3();
        let mut p = Partition::read(&cluster, &key(), Replica::Sequence, ReadModeSc::Session);
        p.node_read(&cluster).unwrap();
        p.prepare_retry_read(false);
        p.prepare_retry_read(false);
        p.prepare_retry_read(false);
        assert_eq!(p.sequence(), 1);
        assert_eq!(p.node_read(&cluster).unwrap().name(), "B");
    }

    #[test]
    fn test_write_client_timeout_keeps_replica() {
        let (cluster, _) = cluster3();
        let mut p = Partition::write(&key(), Replica::Sequence);
        p.node_write(&cluster).unwrap();
        p.prepare_retry_write(true);
        assert_eq!(p.sequence(), 0);
        p.prepare_retry_write(false);
        assert_eq!(p.sequence(), 1);
    }

    #[test]
    fn test_with_sequence_starts_at_replica() {
        let (cluster, _) = cluster3();
        let mut p = Partition::read(&cluster, &key(), Replica::Sequence, ReadModeSc::Session)
            .with_sequence(2);
        assert_eq!(p.node_read(&cluster).unwrap().name(), "C");
    }

    #[test]
    fn test_master_write_ignores_sequence() {
        let (cluster, _) = cluster3();
        let mut p = Partition::write(&key(), Replica::Master);
        p.node_write(&cluster).unwrap();
        p.prepare_retry_write(false);
        assert_eq!(p.node_write(&cluster).unwrap().name(), "A");
    }

    #[test]
    fn test_inactive_nodes_skipped() {
        let (cluster, nodes) = cluster3();
        nodes[0].set_active(false);
        let mut p = Partition::read(&cluster, &key(), Replica::Sequence, ReadModeSc::Session);
        assert_eq!(p.node_read(&cluster).unwrap().name(), "B");

        let mut m = Partition::write(&key(), Replica::Master);
        assert!(matches!(m.node_write(&cluster), Err(Error::InvalidNode(_))));
    }

    #[test]
    fn test_linearize_keeps_replica_on_client_timeout() {
        let (cluster, _) = cluster3();
        let mut table = Partitions::from_fn(3, |_| cluster.nodes());
        table.sc_mode = true;
        cluster.set_partitions("test", table);

        let mut p = Partition::read(&cluster, &key(), Replica::Sequence, ReadModeSc::Linearize);
        p.node_read(&cluster).unwrap();
        p.prepare_retry_read(true);
        assert_eq!(p.sequence(), 0);

        let mut s = Partition::read(&cluster, &key(), Replica::Sequence, ReadModeSc::Session);
        s.node_read(&cluster).unwrap();
        s.prepare_retry_read(false);
        assert_eq!(s.node_read(&cluster).unwrap().name(), "A");
    }

    #[test]
    fn test_prefer_rack() {
        let nodes: Vec<Arc<dyn Node>> = vec![
            Arc::new(MockNode::silent("A").with_rack("test", 1)),
            Arc::new(MockNode::silent("B").with_rack("test", 2)),
        ];
        let cluster = StaticCluster::new(nodes.clone()).with_rack_ids(vec![2]);
        cluster.set_partitions("test", Partitions::from_fn(2, |_| nodes.clone()));
        let mut p = Partition::read(&cluster, &key(), Replica::PreferRack, ReadModeSc::Session);
        assert_eq!(p.node_read(&cluster).unwrap().name(), "B");
    }

    #[test]
    fn test_random_stays_in_partition() {
        let (cluster, _) = cluster3();
        let mut p = Partition::read(&cluster, &key(), Replica::Random, ReadModeSc::Session);
        for _ in 0..10 {
            let name = p.node_read(&cluster).unwrap().name().to_string();
            assert!(["A", "B", "C"].contains(&name.as_str()));
        }
    }

    #[test]
    fn test_empty_table_has_no_node() {
        let (cluster, _) = cluster3();
        cluster.set_partitions(
            "test",
            Partitions {
                replicas: Vec::new(),
                sc_mode: false,
            },
        );
        for replica in [
            Replica::Master,
            Replica::MasterProles,
            Replica::Sequence,
            Replica::PreferRack,
            Replica::Random,
        ] {
            let mut p = Partition::read(&cluster, &key(), replica, ReadModeSc::Session);
            assert!(matches!(p.node_read(&cluster), Err(Error::InvalidNode(_))));
        }
    }

    #[test]
    fn test_unknown_namespace() {
        let (cluster, _) = cluster3();
        let k = Key::new("other", "s", 1i64).unwrap();
        let mut p = Partition::write(&k, Replica::Master);
        assert!(matches!(p.node_write(&cluster), Err(Error::InvalidNode(_))));
    }

    proptest! {
        #[test]
        fn prop_retry_prepare_is_idempotent(k in 1usize..20) {
            let (cluster, _) = cluster3();
            let mut once = Partition::read(&cluster, &key(), Replica::Sequence, ReadModeSc::Session);
            let mut many = once.clone();
            once.node_read(&cluster).unwrap();
            many.node_read(&cluster).unwrap();
            once.prepare_retry_read(false);
            for _ in 0..k {
                many.prepare_retry_read(false);
            }
            prop_assert_eq!(once.sequence(), many.sequence());
        }
    }
}
