//! Node fan-out
//!
//! `concurrent_nodes` selects the execution shape:
//!
//! | Value | Behaviour |
//! |-------|-----------|
//! | 1 | nodes run one after another on the calling thread |
//! | 0 | one scoped thread per node |
//! | n | at most n scoped threads pulling nodes from a shared cursor |
//!
//! Without `allow_partial_results` the first failed node stops the fan-out:
//! nodes not yet started are skipped.

use crate::command::{BatchRun, NodeCommand, NodeOutcome};
use crate::node::{group, BatchNode};
use meridian_executor::Executor;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, warn};

/// Run every key of `run` and collect the per-node outcomes
pub(crate) fn dispatch(exec: &Executor, run: &BatchRun<'_>) -> Vec<NodeOutcome> {
    let (nodes, unrouted) = group(run, 0..run.records.len(), 0);
    let mut outcomes = Vec::with_capacity(nodes.len() + 1);
    if !unrouted.is_empty() {
        warn!(
            target: "meridian::batch",
            command = run.name,
            keys = unrouted.len(),
            "keys without a reachable node"
        );
        outcomes.push(NodeOutcome {
            slots: Vec::new(),
            failures: unrouted.into_iter().map(|(i, e)| (vec![i], e)).collect(),
        });
        if !run.policy.allow_partial_results {
            return outcomes;
        }
    }

    let workers = match run.policy.concurrent_nodes {
        0 => nodes.len(),
        n => n.min(nodes.len()),
    };
    debug!(
        target: "meridian::batch",
        command = run.name,
        keys = run.records.len(),
        nodes = nodes.len(),
        workers,
        "dispatching batch"
    );

    if workers <= 1 {
        for target in nodes {
            let outcome = run_node(exec, run, target);
            let stop = outcome.failed() && !run.policy.allow_partial_results;
            outcomes.push(outcome);
            if stop {
                break;
            }
        }
        return outcomes;
    }

    outcomes.extend(run_parallel(exec, run, nodes, workers));
    outcomes
}

fn run_node(exec: &Executor, run: &BatchRun<'_>, target: BatchNode) -> NodeOutcome {
    let mut cmd = NodeCommand::new(run, target, 0, run.policy.base.clone());
    let result = exec.execute(&mut cmd);
    cmd.finish(result)
}

fn run_parallel(
    exec: &Executor,
    run: &BatchRun<'_>,
    nodes: Vec<BatchNode>,
    workers: usize,
) -> Vec<NodeOutcome> {
    let jobs: Vec<Mutex<Option<BatchNode>>> = nodes.into_iter().map(|n| Mutex::new(Some(n))).collect();
    let cursor = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let results: Mutex<Vec<NodeOutcome>> = Mutex::new(Vec::with_capacity(jobs.len()));

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                if abort.load(Ordering::Acquire) {
                    break;
                }
                let next = cursor.fetch_add(1, Ordering::AcqRel);
                let Some(job) = jobs.get(next) else {
                    break;
                };
                let Some(target) = job.lock().take() else {
                    continue;
                };
                let outcome = run_node(exec, run, target);
                if outcome.failed() && !run.policy.allow_partial_results {
                    abort.store(true, Ordering::Release);
                }
                results.lock().push(outcome);
            });
        }
    });

    results.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Mode;
    use crate::record::{BatchRecord, ReadBins};
    use meridian_cluster::testing::{MemoryServer, MockNode};
    use meridian_cluster::{Node, Partitions, StaticCluster};
    use meridian_core::{BatchPolicy, Key, ResultCode};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn cluster(nodes: &[Arc<MockNode>]) -> Arc<StaticCluster> {
        let dyn_nodes: Vec<Arc<dyn Node>> =
            nodes.iter().map(|n| Arc::clone(n) as Arc<dyn Node>).collect();
        let cluster = StaticCluster::new(dyn_nodes.clone());
        let count = dyn_nodes.len();
        cluster.set_partitions(
            "test",
            Partitions::from_fn(1, |pid| vec![Arc::clone(&dyn_nodes[pid as usize % count])]),
        );
        Arc::new(cluster)
    }

    fn records(server: &MemoryServer, n: i64) -> Vec<BatchRecord> {
        (0..n)
            .map(|i| {
                let key = Key::new("test", "s", i).unwrap();
                server.insert(&key, HashMap::from([("v".to_string(), i.into())]));
                BatchRecord::read(key, ReadBins::All)
            })
            .collect()
    }

    fn run_with(concurrent_nodes: usize) {
        let server = MemoryServer::new();
        let nodes: Vec<Arc<MockNode>> = ["A", "B", "C", "D"]
            .iter()
            .map(|n| Arc::new(MockNode::serving(n, Arc::clone(&server))))
            .collect();
        let cluster = cluster(&nodes);
        let exec = Executor::new(cluster.clone());
        let recs = records(&server, 40);
        let policy = BatchPolicy {
            concurrent_nodes,
            ..BatchPolicy::default()
        };
        let run = BatchRun {
            name: "batch_get",
            cluster: cluster.as_ref(),
            records: &recs,
            policy: &policy,
            mode: Mode::Keys,
            pass: None,
            txn: None,
        };
        let outcomes = dispatch(&exec, &run);
        let mut seen: Vec<usize> = outcomes
            .iter()
            .flat_map(|o| o.slots.iter().map(|(i, s)| {
                assert_eq!(s.code, ResultCode::OK);
                *i
            }))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
        let requests: usize = nodes.iter().map(|n| n.requests()).sum();
        assert_eq!(requests, outcomes.len());
    }

    #[test]
    fn test_sequential() {
        run_with(1);
    }

    #[test]
    fn test_thread_per_node() {
        run_with(0);
    }

    #[test]
    fn test_bounded_workers() {
        run_with(2);
    }

    #[test]
    fn test_first_failure_stops_sequential_fan_out() {
        let server = MemoryServer::new();
        let silent = Arc::new(MockNode::silent("A"));
        let serving = Arc::new(MockNode::serving("B", Arc::clone(&server)));
        let cluster = cluster(&[Arc::clone(&silent), Arc::clone(&serving)]);
        let exec = Executor::new(cluster.clone());
        let recs = records(&server, 20);
        let mut policy = BatchPolicy {
            allow_partial_results: false,
            ..BatchPolicy::default()
        };
        policy.base.socket_timeout = std::time::Duration::from_millis(10);
        policy.base.total_timeout = std::time::Duration::ZERO;
        policy.base.max_retries = 0;
        let run = BatchRun {
            name: "batch_get",
            cluster: cluster.as_ref(),
            records: &recs,
            policy: &policy,
            mode: Mode::Keys,
            pass: None,
            txn: None,
        };
        let outcomes = dispatch(&exec, &run);
        assert_eq!(outcomes.iter().filter(|o| o.failed()).count(), 1);
        assert!(outcomes.last().unwrap().failed());
        if outcomes.len() == 1 {
            assert_eq!(serving.requests(), 0);
        }
    }
}
