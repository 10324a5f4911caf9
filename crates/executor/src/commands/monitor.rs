//! Transaction monitor record
//!
//! The first write of a transaction creates a hidden record keyed by the
//! transaction id in [`MONITOR_SET`]. It holds the id and the ordered,
//! duplicate-free list of digests the transaction wrote, so the server can
//! finish an abandoned transaction on its own. Later writes append to the
//! list.
//!
//! The reply to every monitor write carries the transaction deadline, which
//! then rides along with each transactional write.

use crate::command::{key_affinity, Command};
use crate::engine::Executor;
use crate::reader::ResponseReader;
use meridian_cluster::{Cluster, Node, Partition};
use meridian_core::list::{self, write_flags, ListOrder, ListPolicy};
use meridian_core::{
    BasePolicy, Bin, Error, Expiration, Key, Operation, Result, ResultCode, Txn, Value,
    WritePolicy, MONITOR_SET,
};
use meridian_proto::{info2, MessageBuilder};
use std::sync::Arc;
use tracing::debug;

/// Bin holding the transaction id
pub const BIN_ID: &str = "id";
/// Bin holding the digests written by the transaction
pub const BIN_DIGESTS: &str = "keyds";
/// Bin set once the transaction is committed and must roll forward
pub const BIN_ROLL_FORWARD: &str = "fwd";

/// Key of the monitor record of `txn`
pub fn monitor_key(txn: &Txn) -> Result<Key> {
    let namespace = txn.namespace().ok_or_else(|| {
        Error::InvalidArgument(format!("transaction {} has no namespace yet", txn.id()))
    })?;
    Key::new(namespace, MONITOR_SET, Value::Int(txn.id() as i64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorOp {
    AddKeys,
    RollForward,
    Close,
}

/// Write or delete of the monitor record
pub struct MonitorCommand {
    op: MonitorOp,
    txn: Arc<Txn>,
    key: Key,
    policy: WritePolicy,
    partition: Partition,
    ops: Vec<Operation>,
}

impl MonitorCommand {
    fn new(op: MonitorOp, base: &BasePolicy, txn: &Arc<Txn>, ops: Vec<Operation>) -> Result<Self> {
        let key = monitor_key(txn)?;
        let mut policy = WritePolicy::from_base(BasePolicy {
            txn: None,
            ..base.clone()
        });
        match op {
            MonitorOp::AddKeys => {
                policy.expiration = Expiration::Seconds(txn.timeout());
                policy.respond_per_each_op = true;
            }
            MonitorOp::RollForward => {}
            MonitorOp::Close => policy.durable_delete = true,
        }
        let partition = Partition::write(&key, policy.base.replica);
        Ok(MonitorCommand {
            op,
            txn: Arc::clone(txn),
            key,
            policy,
            partition,
            ops,
        })
    }
}

impl Command for MonitorCommand {
    fn name(&self) -> &'static str {
        match self.op {
            MonitorOp::AddKeys => "txn_add_keys",
            MonitorOp::RollForward => "txn_mark_roll_forward",
            MonitorOp::Close => "txn_close",
        }
    }

    fn policy(&self) -> &BasePolicy {
        &self.policy.base
    }

    fn is_write(&self) -> bool {
        true
    }

    fn affinity(&self) -> u32 {
        key_affinity(&self.key)
    }

    fn select_node(&mut self, cluster: &dyn Cluster) -> Result<Arc<dyn Node>> {
        self.partition.node_write(cluster)
    }

    fn build_request(&mut self) -> Result<Vec<u8>> {
        let mut b = MessageBuilder::new();
        b.write_attrs(&self.policy);
        if self.op == MonitorOp::Close {
            b.header.info2 |= info2::DELETE;
        }
        b.key_fields(&self.key, false)?;
        for op in &self.ops {
            b.op(op)?;
        }
        b.finish(self.policy.base.use_compression)
    }

    fn parse_response(&mut self, reader: &mut ResponseReader<'_>) -> Result<()> {
        let msg = reader.read_message()?;
        if let Some(deadline) = msg.deadline()? {
            self.txn.set_deadline(deadline);
        }
        match (self.op, msg.result_code()) {
            (_, ResultCode::OK) => Ok(()),
            (MonitorOp::RollForward, ResultCode::MRT_COMMITTED) => Ok(()),
            (MonitorOp::Close, ResultCode::KEY_NOT_FOUND) => Ok(()),
            (_, code) => Err(Error::server(code)),
        }
    }

    fn prepare_retry(&mut self, is_timeout: bool) -> bool {
        self.partition.prepare_retry_write(is_timeout);
        true
    }

    fn on_in_doubt(&mut self) {
        if self.op == MonitorOp::AddKeys {
            self.txn.set_monitor_in_doubt();
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

fn digest_ops(txn: &Txn, digests: Vec<Value>) -> Vec<Operation> {
    let policy = ListPolicy::new(
        ListOrder::Ordered,
        write_flags::ADD_UNIQUE | write_flags::NO_FAIL | write_flags::PARTIAL,
    );
    let mut ops = Vec::with_capacity(2);
    if txn.deadline() == 0 {
        ops.push(Operation::put(Bin::new(BIN_ID, Value::Int(txn.id() as i64))));
    }
    if digests.len() == 1 {
        let digest = digests.into_iter().next().unwrap_or(Value::Nil);
        ops.push(list::append(policy, BIN_DIGESTS, digest));
    } else {
        ops.push(list::append_items(policy, BIN_DIGESTS, digests));
    }
    ops
}

/// Register keys with the monitor before writing them.
///
/// Keys already in the write-set are skipped; when none remain nothing is
/// sent.
pub fn add_keys<'a>(
    exec: &Executor,
    base: &BasePolicy,
    txn: &Arc<Txn>,
    keys: impl IntoIterator<Item = &'a Key>,
) -> Result<()> {
    let digests: Vec<Value> = keys
        .into_iter()
        .filter(|k| !txn.write_exists(k.digest()))
        .map(|k| Value::Blob(k.digest().as_bytes().to_vec()))
        .collect();
    if digests.is_empty() {
        return Ok(());
    }
    let count = digests.len();
    let ops = digest_ops(txn, digests);
    let mut cmd = MonitorCommand::new(MonitorOp::AddKeys, base, txn, ops)?;
    exec.execute(&mut cmd)?;
    debug!(
        target: "meridian::txn",
        txn = txn.id(),
        keys = count,
        deadline = txn.deadline(),
        "registered keys with monitor"
    );
    Ok(())
}

/// Flag the monitor so the server rolls the transaction forward on recovery.
pub fn mark_roll_forward(exec: &Executor, base: &BasePolicy, txn: &Arc<Txn>) -> Result<()> {
    let ops = vec![Operation::put(Bin::new(BIN_ROLL_FORWARD, true))];
    let mut cmd = MonitorCommand::new(MonitorOp::RollForward, base, txn, ops)?;
    exec.execute(&mut cmd)
}

/// Delete the monitor record. A missing record counts as deleted.
pub fn close(exec: &Executor, base: &BasePolicy, txn: &Arc<Txn>) -> Result<()> {
    let mut cmd = MonitorCommand::new(MonitorOp::Close, base, txn, Vec::new())?;
    exec.execute(&mut cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_key_requires_namespace() {
        let txn = Txn::new();
        assert!(monitor_key(&txn).is_err());
        txn.set_namespace("test").unwrap();
        let key = monitor_key(&txn).unwrap();
        assert_eq!(key.namespace(), "test");
        assert_eq!(key.set_name(), MONITOR_SET);
    }

    #[test]
    fn test_first_add_writes_id() {
        let txn = Txn::new();
        let ops = digest_ops(&txn, vec![Value::Blob(vec![1; 20])]);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].bin_name, BIN_ID);
        assert_eq!(ops[1].bin_name, BIN_DIGESTS);

        txn.set_deadline(100);
        let ops = digest_ops(&txn, vec![Value::Blob(vec![1; 20]), Value::Blob(vec![2; 20])]);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].bin_name, BIN_DIGESTS);
    }
}
