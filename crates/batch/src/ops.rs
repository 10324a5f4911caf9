//! Batch calls
//!
//! Two families share one dispatch path:
//! - key-list calls ([`batch_exists`], [`batch_get`] and friends) return one
//!   `Result` per key. Not found and filtered out are answers, not errors.
//!   The call itself fails only when every key failed, or on the first node
//!   failure when partial results are off.
//! - record calls ([`batch_operate`], [`batch_delete`], [`batch_execute`])
//!   write each key's code into its [`BatchRecord`] and return the records.
//!
//! [`txn_verify`] and [`txn_roll`] are the record calls the transaction
//! coordinator issues at commit and abort.

use crate::command::{BatchRun, Mode};
use crate::dispatch::dispatch;
use crate::entry::TxnPass;
use crate::record::{BatchOperation, BatchRecord, BatchResults, ReadBins, UdfCall};
use meridian_core::{
    BatchDeletePolicy, BatchPolicy, BatchUdfPolicy, BatchWritePolicy, Error, Key, Operation,
    Record, Result, ResultCode, Txn, Value,
};
use meridian_executor::commands::monitor;
use meridian_executor::Executor;
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// Key-list calls
// ============================================================================

/// Whether each key exists
pub fn batch_exists(exec: &Executor, policy: &BatchPolicy, keys: &[Key]) -> Result<Vec<Result<bool>>> {
    let records = run_keys(exec, policy, "batch_exists", keys, ReadBins::Header)?;
    Ok(records
        .into_iter()
        .map(|r| r.map(|r| r.result_code == ResultCode::OK))
        .collect())
}

/// Every bin of each key; `None` when the key is not found
pub fn batch_get(
    exec: &Executor,
    policy: &BatchPolicy,
    keys: &[Key],
) -> Result<Vec<Result<Option<Record>>>> {
    collect_records(run_keys(exec, policy, "batch_get", keys, ReadBins::All)?)
}

/// Selected bins of each key
pub fn batch_get_bins(
    exec: &Executor,
    policy: &BatchPolicy,
    keys: &[Key],
    bins: &[&str],
) -> Result<Vec<Result<Option<Record>>>> {
    collect_records(run_keys(exec, policy, "batch_get", keys, ReadBins::names(bins))?)
}

/// Generation and expiration of each key
pub fn batch_get_header(
    exec: &Executor,
    policy: &BatchPolicy,
    keys: &[Key],
) -> Result<Vec<Result<Option<Record>>>> {
    collect_records(run_keys(exec, policy, "batch_get_header", keys, ReadBins::Header)?)
}

/// Read operations applied to each key
pub fn batch_get_ops(
    exec: &Executor,
    policy: &BatchPolicy,
    keys: &[Key],
    ops: &[Operation],
) -> Result<Vec<Result<Option<Record>>>> {
    if let Some(op) = ops.iter().find(|op| op.op_type.is_write()) {
        return Err(Error::InvalidArgument(format!(
            "batch_get_ops accepts read operations only, got {:?}",
            op.op_type
        )));
    }
    let bins = ReadBins::Ops(ops.to_vec().into());
    collect_records(run_keys(exec, policy, "batch_get", keys, bins)?)
}

fn run_keys(
    exec: &Executor,
    policy: &BatchPolicy,
    name: &'static str,
    keys: &[Key],
    bins: ReadBins,
) -> Result<Vec<Result<BatchRecord>>> {
    let mut records: Vec<BatchRecord> = keys
        .iter()
        .map(|k| BatchRecord::read(k.clone(), bins.clone()))
        .collect();
    let txn = prepare_txn(exec, policy, &records)?;
    let errors = run(exec, policy, name, Mode::Keys, None, txn, &mut records)?;

    let out: Vec<Result<BatchRecord>> = records
        .into_iter()
        .zip(errors)
        .map(|(record, error)| match error {
            Some(e) => Err(e),
            None if record.result_code == ResultCode::NO_RESPONSE => {
                Err(Error::server(ResultCode::NO_RESPONSE))
            }
            None => Ok(record),
        })
        .collect();

    if !out.is_empty() && out.iter().all(|r| r.is_err()) {
        if let Some(Err(e)) = out.into_iter().next() {
            return Err(e);
        }
        return Ok(Vec::new());
    }
    Ok(out)
}

fn collect_records(records: Vec<Result<BatchRecord>>) -> Result<Vec<Result<Option<Record>>>> {
    Ok(records
        .into_iter()
        .map(|r| r.map(|r| if r.is_ok() { r.record } else { None }))
        .collect())
}

// ============================================================================
// Record calls
// ============================================================================

/// Run heterogeneous operations, one per record.
///
/// Per-key failures are stored in the records. The call fails on invalid
/// input, on a transaction that cannot accept the keys, or on the first node
/// failure when partial results are off.
pub fn batch_operate(
    exec: &Executor,
    policy: &BatchPolicy,
    mut records: Vec<BatchRecord>,
) -> Result<BatchResults> {
    let txn = prepare_txn(exec, policy, &records)?;
    run(exec, policy, "batch_operate", Mode::Records, None, txn, &mut records)?;
    Ok(BatchResults::new(records))
}

/// Apply the same operations to every key
pub fn batch_operate_keys(
    exec: &Executor,
    policy: &BatchPolicy,
    write_policy: Option<Arc<BatchWritePolicy>>,
    keys: &[Key],
    ops: &[Operation],
) -> Result<BatchResults> {
    let ops: Arc<[Operation]> = ops.to_vec().into();
    let is_write = ops.iter().any(|op| op.op_type.is_write());
    let records = keys
        .iter()
        .map(|k| {
            let op = if is_write {
                BatchOperation::Write {
                    policy: write_policy.clone(),
                    ops: Arc::clone(&ops),
                }
            } else {
                BatchOperation::Read {
                    policy: None,
                    bins: ReadBins::Ops(Arc::clone(&ops)),
                }
            };
            BatchRecord::new(k.clone(), op)
        })
        .collect();
    batch_operate(exec, policy, records)
}

/// Delete every key
pub fn batch_delete(
    exec: &Executor,
    policy: &BatchPolicy,
    delete_policy: Option<Arc<BatchDeletePolicy>>,
    keys: &[Key],
) -> Result<BatchResults> {
    let records = keys
        .iter()
        .map(|k| BatchRecord::delete(k.clone(), delete_policy.clone()))
        .collect();
    batch_operate(exec, policy, records)
}

/// Call `package.function(args)` on every key.
///
/// A failed call leaves `UDF_BAD_RESPONSE` in the record and the server's
/// failure text in `message`.
pub fn batch_execute(
    exec: &Executor,
    policy: &BatchPolicy,
    udf_policy: Option<Arc<BatchUdfPolicy>>,
    keys: &[Key],
    package: &str,
    function: &str,
    args: &[Value],
) -> Result<BatchResults> {
    let call = Arc::new(UdfCall::new(package, function, args));
    let records = keys
        .iter()
        .map(|k| BatchRecord::udf(k.clone(), udf_policy.clone(), Arc::clone(&call)))
        .collect();
    batch_operate(exec, policy, records)
}

// ============================================================================
// Transaction passes
// ============================================================================

/// Check every key of the read-set still has the version the transaction read
pub fn txn_verify(exec: &Executor, policy: &BatchPolicy, txn: &Arc<Txn>) -> Result<BatchResults> {
    let mut records: Vec<BatchRecord> = txn
        .reads()
        .into_iter()
        .map(|(key, _)| BatchRecord::read(key, ReadBins::Header))
        .collect();
    run(
        exec,
        policy,
        "txn_verify",
        Mode::Records,
        Some(TxnPass::Verify),
        Some(Arc::clone(txn)),
        &mut records,
    )?;
    Ok(BatchResults::new(records))
}

/// Roll every key of the write-set forward (commit) or back (abort)
pub fn txn_roll(
    exec: &Executor,
    policy: &BatchPolicy,
    txn: &Arc<Txn>,
    forward: bool,
) -> Result<BatchResults> {
    let (name, pass) = if forward {
        ("txn_roll_forward", TxnPass::RollForward)
    } else {
        ("txn_roll_back", TxnPass::RollBack)
    };
    let marker: Arc<[Operation]> = Arc::from(Vec::new());
    let mut records: Vec<BatchRecord> = txn
        .writes()
        .into_iter()
        .map(|key| BatchRecord::write(key, Arc::clone(&marker)))
        .collect();
    run(
        exec,
        policy,
        name,
        Mode::Records,
        Some(pass),
        Some(Arc::clone(txn)),
        &mut records,
    )?;
    Ok(BatchResults::new(records))
}

// ============================================================================
// Shared
// ============================================================================

/// Check the keys against the policy's transaction and register the write
/// keys with its monitor.
fn prepare_txn(
    exec: &Executor,
    policy: &BatchPolicy,
    records: &[BatchRecord],
) -> Result<Option<Arc<Txn>>> {
    let Some(txn) = &policy.base.txn else {
        return Ok(None);
    };
    txn.verify_command()?;
    txn.set_namespace_keys(records.iter().map(|r| &r.key))?;
    let writes: Vec<&Key> = records.iter().filter(|r| r.has_write).map(|r| &r.key).collect();
    if !writes.is_empty() {
        monitor::add_keys(exec, &policy.base, txn, writes)?;
    }
    Ok(Some(Arc::clone(txn)))
}

/// Dispatch `records` and write the outcomes back.
///
/// Returns the node error of every key that got one, by offset.
fn run(
    exec: &Executor,
    policy: &BatchPolicy,
    name: &'static str,
    mode: Mode,
    pass: Option<TxnPass>,
    txn: Option<Arc<Txn>>,
    records: &mut [BatchRecord],
) -> Result<Vec<Option<Error>>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let outcomes = {
        let run = BatchRun {
            name,
            cluster: exec.cluster().as_ref(),
            records: &*records,
            policy,
            mode,
            pass,
            txn,
        };
        dispatch(exec, &run)
    };

    let mut errors: Vec<Option<Error>> = vec![None; records.len()];
    let mut first: Option<Error> = None;
    let mut failed_keys = 0usize;
    for outcome in outcomes {
        for (i, slot) in outcome.slots {
            records[i].set_outcome(slot.code, slot.record, slot.message);
        }
        for (offsets, error) in outcome.failures {
            for &i in &offsets {
                records[i].set_error(&error);
                errors[i] = Some(error.clone());
            }
            failed_keys += offsets.len();
            first.get_or_insert(error);
        }
    }

    debug!(
        target: "meridian::batch",
        command = name,
        keys = records.len(),
        failed_keys,
        "batch finished"
    );
    match first {
        Some(e) if !policy.allow_partial_results => Err(e),
        _ => Ok(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_cluster::testing::{single_owner_cluster, MemoryServer, MockNode};
    use std::collections::HashMap;

    fn setup() -> (Arc<MemoryServer>, Executor) {
        let server = MemoryServer::new();
        let node = Arc::new(MockNode::serving("A", Arc::clone(&server)));
        let cluster = single_owner_cluster("test", node, &[]);
        (server, Executor::new(Arc::new(cluster)))
    }

    fn key(i: i64) -> Key {
        Key::new("test", "s", i).unwrap()
    }

    #[test]
    fn test_empty_batch_sends_nothing() {
        let (_, exec) = setup();
        let results = batch_get(&exec, &BatchPolicy::default(), &[]).unwrap();
        assert!(results.is_empty());
        let results = batch_operate(&exec, &BatchPolicy::default(), Vec::new()).unwrap();
        assert!(results.status);
    }

    #[test]
    fn test_get_ops_rejects_writes() {
        let (_, exec) = setup();
        let ops = [Operation::put(meridian_core::Bin::new("a", 1i64))];
        let err = batch_get_ops(&exec, &BatchPolicy::default(), &[key(1)], &ops).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_not_found_is_an_answer() {
        let (server, exec) = setup();
        server.insert(&key(1), HashMap::from([("a".to_string(), Value::Int(1))]));
        let results = batch_get(&exec, &BatchPolicy::default(), &[key(1), key(2)]).unwrap();
        assert_eq!(results[0].as_ref().unwrap().as_ref().unwrap().get("a"), Some(&Value::Int(1)));
        assert!(results[1].as_ref().unwrap().is_none());
    }

    #[test]
    fn test_closed_txn_rejects_batch() {
        let (_, exec) = setup();
        let txn = Arc::new(Txn::new());
        txn.set_state(meridian_core::TxnState::Committed);
        let mut policy = BatchPolicy::default();
        policy.base.txn = Some(txn);
        let err = batch_get(&exec, &policy, &[key(1)]).unwrap_err();
        assert!(matches!(err, Error::TxnClosed { .. }));
    }
}
