//! Grouping keys by owning node

use crate::command::BatchRun;
use crate::record::BatchOperation;
use meridian_cluster::{Node, Partition};
use meridian_core::Error;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Offsets into the caller's slice that one node currently owns
#[derive(Debug)]
pub(crate) struct BatchNode {
    pub node: Arc<dyn Node>,
    pub offsets: Vec<usize>,
}

/// Group `offsets` by the node each key routes to at replica `sequence`.
///
/// Offsets keep their relative order within a group. Keys with no
/// reachable node are returned separately with the routing error.
pub(crate) fn group(
    run: &BatchRun<'_>,
    offsets: impl IntoIterator<Item = usize>,
    sequence: usize,
) -> (Vec<BatchNode>, Vec<(usize, Error)>) {
    let base = &run.policy.base;
    let mut groups: Vec<BatchNode> = Vec::new();
    let mut by_name: FxHashMap<String, usize> = FxHashMap::default();
    let mut unrouted = Vec::new();

    for i in offsets {
        let record = &run.records[i];
        let routed = if run.routes_as_write(i) {
            Partition::write(&record.key, base.replica)
                .with_sequence(sequence)
                .node_write(run.cluster)
        } else {
            let mode = match &record.op {
                BatchOperation::Read {
                    policy: Some(p), ..
                } => p.read_mode_sc,
                _ => base.read_mode_sc,
            };
            Partition::read(run.cluster, &record.key, base.replica, mode)
                .with_sequence(sequence)
                .node_read(run.cluster)
        };
        let node = match routed {
            Ok(node) => node,
            Err(e) => {
                unrouted.push((i, e));
                continue;
            }
        };
        match by_name.get(node.name()) {
            Some(&g) => groups[g].offsets.push(i),
            None => {
                by_name.insert(node.name().to_string(), groups.len());
                groups.push(BatchNode {
                    node,
                    offsets: vec![i],
                });
            }
        }
    }
    (groups, unrouted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Mode;
    use crate::record::{BatchRecord, ReadBins};
    use meridian_cluster::testing::MockNode;
    use meridian_cluster::{Partitions, StaticCluster};
    use meridian_core::{BatchPolicy, Key};

    fn two_node_cluster() -> StaticCluster {
        let a: Arc<dyn Node> = Arc::new(MockNode::silent("A"));
        let b: Arc<dyn Node> = Arc::new(MockNode::silent("B"));
        let cluster = StaticCluster::new(vec![Arc::clone(&a), Arc::clone(&b)]);
        cluster.set_partitions(
            "test",
            Partitions::from_fn(2, |pid| {
                if pid % 2 == 0 {
                    vec![Arc::clone(&a), Arc::clone(&b)]
                } else {
                    vec![Arc::clone(&b), Arc::clone(&a)]
                }
            }),
        );
        cluster
    }

    fn records(n: i64) -> Vec<BatchRecord> {
        (0..n)
            .map(|i| BatchRecord::read(Key::new("test", "s", i).unwrap(), ReadBins::All))
            .collect()
    }

    #[test]
    fn test_group_by_master() {
        let cluster = two_node_cluster();
        let recs = records(20);
        let policy = BatchPolicy::default();
        let run = BatchRun {
            name: "batch_get",
            cluster: &cluster,
            records: &recs,
            policy: &policy,
            mode: Mode::Keys,
            pass: None,
            txn: None,
        };
        let (groups, unrouted) = group(&run, 0..recs.len(), 0);
        assert!(unrouted.is_empty());
        let total: usize = groups.iter().map(|g| g.offsets.len()).sum();
        assert_eq!(total, 20);
        for g in &groups {
            let expected = if g.node.name() == "A" { 0 } else { 1 };
            for &i in &g.offsets {
                assert_eq!(recs[i].key.partition_id() % 2, expected);
            }
            assert!(g.offsets.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_sequence_moves_reads_to_replica() {
        let cluster = two_node_cluster();
        let recs = records(20);
        let policy = BatchPolicy::default();
        let run = BatchRun {
            name: "batch_get",
            cluster: &cluster,
            records: &recs,
            policy: &policy,
            mode: Mode::Keys,
            pass: None,
            txn: None,
        };
        let (first, _) = group(&run, 0..recs.len(), 0);
        let (second, _) = group(&run, 0..recs.len(), 1);
        for g in &first {
            let moved = second
                .iter()
                .find(|s| s.node.name() != g.node.name())
                .unwrap();
            assert_eq!(moved.offsets, g.offsets);
        }
    }

    #[test]
    fn test_unknown_namespace_is_unrouted() {
        let cluster = two_node_cluster();
        let recs = vec![BatchRecord::read(Key::new("other", "s", 1i64).unwrap(), ReadBins::All)];
        let policy = BatchPolicy::default();
        let run = BatchRun {
            name: "batch_get",
            cluster: &cluster,
            records: &recs,
            policy: &policy,
            mode: Mode::Keys,
            pass: None,
            txn: None,
        };
        let (groups, unrouted) = group(&run, [0], 0);
        assert!(groups.is_empty());
        assert!(matches!(unrouted[0].1, Error::InvalidNode(_)));
    }
}
