//! Single-key writes: put, append, prepend, add, delete, touch

use super::{check_txn, monitor, write_txn_fields};
use crate::command::{key_affinity, Command};
use crate::engine::Executor;
use crate::reader::ResponseReader;
use meridian_cluster::{Cluster, Node, Partition};
use meridian_core::{
    BasePolicy, Bin, Error, Key, Operation, Result, ResultCode, WritePolicy,
};
use meridian_proto::{info2, MessageBuilder};
use std::sync::Arc;

/// Kind of single-key write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Write bins
    Put,
    /// Append to string/blob bins
    Append,
    /// Prepend to string/blob bins
    Prepend,
    /// Increment numeric bins
    Add,
    /// Delete the record
    Delete,
    /// Reset the expiration
    Touch,
}

impl WriteKind {
    fn name(self) -> &'static str {
        match self {
            WriteKind::Put => "put",
            WriteKind::Append => "append",
            WriteKind::Prepend => "prepend",
            WriteKind::Add => "add",
            WriteKind::Delete => "delete",
            WriteKind::Touch => "touch",
        }
    }

    fn op(self, bin: &Bin) -> Operation {
        let bin = bin.clone();
        match self {
            WriteKind::Append => Operation::append(bin),
            WriteKind::Prepend => Operation::prepend(bin),
            WriteKind::Add => Operation::add(bin),
            _ => Operation::put(bin),
        }
    }
}

/// Write of one record
pub struct WriteCommand {
    kind: WriteKind,
    key: Key,
    policy: WritePolicy,
    partition: Partition,
    ops: Vec<Operation>,
    existed: bool,
}

impl WriteCommand {
    /// Write command for `key`; `bins` is ignored by delete and touch
    pub fn new(kind: WriteKind, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Self {
        let ops = match kind {
            WriteKind::Delete => Vec::new(),
            WriteKind::Touch => vec![Operation::touch()],
            _ => bins.iter().map(|b| kind.op(b)).collect(),
        };
        WriteCommand {
            kind,
            key: key.clone(),
            policy: policy.clone(),
            partition: Partition::write(key, policy.base.replica),
            ops,
            existed: false,
        }
    }

    /// For deletes: whether the record existed
    pub fn existed(&self) -> bool {
        self.existed
    }
}

impl Command for WriteCommand {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn policy(&self) -> &BasePolicy {
        &self.policy.base
    }

    fn is_write(&self) -> bool {
        true
    }

    fn is_idempotent(&self) -> bool {
        !matches!(
            self.kind,
            WriteKind::Append | WriteKind::Prepend | WriteKind::Add
        )
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
        if self.kind == WriteKind::Delete {
            b.header.info2 |= info2::DELETE;
        }
        b.key_fields(&self.key, self.policy.base.send_key)?;
        write_txn_fields(&mut b, self.policy.base.txn.as_deref(), &self.key, true);
        for op in &self.ops {
            b.op(op)?;
        }
        b.finish(self.policy.base.use_compression)
    }

    fn parse_response(&mut self, reader: &mut ResponseReader<'_>) -> Result<()> {
        let msg = reader.read_message()?;
        let code = msg.result_code();
        if let Some(txn) = &self.policy.base.txn {
            txn.on_write(&self.key, msg.version()?, code);
        }
        match code {
            ResultCode::OK => {
                self.existed = true;
                Ok(())
            }
            ResultCode::KEY_NOT_FOUND if self.kind == WriteKind::Delete => Ok(()),
            ResultCode::FILTERED_OUT if !self.policy.base.fail_on_filtered_out => Ok(()),
            code => Err(Error::server(code)),
        }
    }

    fn prepare_retry(&mut self, is_timeout: bool) -> bool {
        self.partition.prepare_retry_write(is_timeout);
        true
    }

    fn on_in_doubt(&mut self) {
        if let Some(txn) = &self.policy.base.txn {
            txn.on_write_in_doubt(&self.key);
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

fn run(exec: &Executor, policy: &WritePolicy, key: &Key, kind: WriteKind, bins: &[Bin]) -> Result<bool> {
    check_txn(&policy.base, key)?;
    if let Some(txn) = &policy.base.txn {
        monitor::add_keys(exec, &policy.base, txn, [key])?;
    }
    let mut cmd = WriteCommand::new(kind, policy, key, bins);
    exec.execute(&mut cmd)?;
    Ok(cmd.existed())
}

fn require_bins(kind: WriteKind, bins: &[Bin]) -> Result<()> {
    if bins.is_empty() {
        return Err(Error::InvalidArgument(format!("{} needs at least one bin", kind.name())));
    }
    Ok(())
}

/// Write bins. A bin with a nil value removes that bin.
pub fn put(exec: &Executor, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<()> {
    require_bins(WriteKind::Put, bins)?;
    run(exec, policy, key, WriteKind::Put, bins).map(|_| ())
}

/// Append to string or blob bins.
pub fn append(exec: &Executor, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<()> {
    require_bins(WriteKind::Append, bins)?;
    run(exec, policy, key, WriteKind::Append, bins).map(|_| ())
}

/// Prepend to string or blob bins.
pub fn prepend(exec: &Executor, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<()> {
    require_bins(WriteKind::Prepend, bins)?;
    run(exec, policy, key, WriteKind::Prepend, bins).map(|_| ())
}

/// Increment integer or float bins.
pub fn add(exec: &Executor, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<()> {
    require_bins(WriteKind::Add, bins)?;
    run(exec, policy, key, WriteKind::Add, bins).map(|_| ())
}

/// Delete a record. Returns whether it existed.
pub fn delete(exec: &Executor, policy: &WritePolicy, key: &Key) -> Result<bool> {
    run(exec, policy, key, WriteKind::Delete, &[])
}

/// Reset a record's expiration. Fails when the record does not exist.
pub fn touch(exec: &Executor, policy: &WritePolicy, key: &Key) -> Result<()> {
    run(exec, policy, key, WriteKind::Touch, &[]).map(|_| ())
}
