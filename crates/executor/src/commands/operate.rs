//! Operate: several reads and writes on one record in one round trip

use super::{check_txn, monitor, write_txn_fields};
use crate::command::{key_affinity, Command};
use crate::engine::Executor;
use crate::reader::ResponseReader;
use meridian_cluster::{Cluster, Node, Partition};
use meridian_core::{
    BasePolicy, Error, Key, Operation, OperationType, Record, Result, ResultCode, WritePolicy,
};
use meridian_proto::{info1, MessageBuilder};
use std::sync::Arc;

/// Read and write flags derived from an operation list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperateFlags {
    /// At least one operation modifies the record
    pub has_write: bool,
    /// At least one operation reads bins
    pub read_bin: bool,
    /// At least one operation reads every bin
    pub read_all: bool,
    /// At least one operation asks for metadata only
    pub read_header: bool,
    /// Re-sending could apply an operation twice
    pub non_idempotent: bool,
}

impl OperateFlags {
    /// Scan `ops`
    pub fn of(ops: &[Operation]) -> Self {
        let mut flags = OperateFlags::default();
        for op in ops {
            match op.op_type {
                OperationType::Read | OperationType::CdtRead => {
                    flags.read_bin = true;
                    flags.read_all |= op.reads_all_bins();
                }
                OperationType::ReadHeader => flags.read_header = true,
                OperationType::Add
                | OperationType::Append
                | OperationType::Prepend
                | OperationType::CdtModify => {
                    flags.has_write = true;
                    flags.non_idempotent = true;
                }
                _ => flags.has_write = true,
            }
        }
        flags
    }

    /// `info1` bits for the read side
    pub fn info1(&self) -> u8 {
        let mut bits = 0;
        if self.read_bin || self.read_header {
            bits |= info1::READ;
        }
        if self.read_all {
            bits |= info1::GET_ALL;
        }
        if self.read_header && !self.read_bin {
            bits |= info1::NOBINDATA;
        }
        bits
    }
}

/// Operate on one record
pub struct OperateCommand {
    key: Key,
    policy: WritePolicy,
    partition: Partition,
    ops: Vec<Operation>,
    flags: OperateFlags,
    record: Option<Record>,
}

impl OperateCommand {
    /// Operate on `key`; reads only route like a read
    pub fn new(cluster: &dyn Cluster, policy: &WritePolicy, key: &Key, ops: &[Operation]) -> Self {
        let flags = OperateFlags::of(ops);
        let partition = if flags.has_write {
            Partition::write(key, policy.base.replica)
        } else {
            Partition::read(cluster, key, policy.base.replica, policy.base.read_mode_sc)
        };
        OperateCommand {
            key: key.clone(),
            policy: policy.clone(),
            partition,
            ops: ops.to_vec(),
            flags,
            record: None,
        }
    }

    /// Record produced by the read operations
    pub fn into_record(self) -> Option<Record> {
        self.record
    }
}

impl Command for OperateCommand {
    fn name(&self) -> &'static str {
        "operate"
    }

    fn policy(&self) -> &BasePolicy {
        &self.policy.base
    }

    fn is_write(&self) -> bool {
        self.flags.has_write
    }

    fn is_idempotent(&self) -> bool {
        !self.flags.non_idempotent
    }

    fn affinity(&self) -> u32 {
        key_affinity(&self.key)
    }

    fn select_node(&mut self, cluster: &dyn Cluster) -> Result<Arc<dyn Node>> {
        if self.flags.has_write {
            self.partition.node_write(cluster)
        } else {
            self.partition.node_read(cluster)
        }
    }

    fn build_request(&mut self) -> Result<Vec<u8>> {
        let mut b = MessageBuilder::new();
        if self.flags.has_write {
            b.write_attrs(&self.policy);
            b.header.info1 |= self.flags.info1();
        } else {
            b.read_attrs(
                &self.policy.base,
                self.flags.read_all,
                self.flags.read_header && !self.flags.read_bin,
            );
        }
        b.key_fields(&self.key, self.policy.base.send_key)?;
        write_txn_fields(
            &mut b,
            self.policy.base.txn.as_deref(),
            &self.key,
            self.flags.has_write,
        );
        for op in self.ops.iter().filter(|op| op.op_type != OperationType::ReadHeader) {
            b.op(op)?;
        }
        b.finish(self.policy.base.use_compression)
    }

    fn parse_response(&mut self, reader: &mut ResponseReader<'_>) -> Result<()> {
        let msg = reader.read_message()?;
        let code = msg.result_code();
        if let Some(txn) = &self.policy.base.txn {
            let version = msg.version()?;
            if self.flags.has_write {
                txn.on_write(&self.key, version, code);
            } else {
                txn.on_read(&self.key, version);
            }
        }
        self.record = match code {
            ResultCode::OK => Some(msg.record(true)?),
            ResultCode::KEY_NOT_FOUND if !self.flags.has_write => None,
            ResultCode::FILTERED_OUT if !self.policy.base.fail_on_filtered_out => None,
            code => return Err(Error::server(code)),
        };
        Ok(())
    }

    fn prepare_retry(&mut self, is_timeout: bool) -> bool {
        if self.flags.has_write {
            self.partition.prepare_retry_write(is_timeout);
        } else {
            self.partition.prepare_retry_read(is_timeout);
        }
        true
    }

    fn on_in_doubt(&mut self) {
        if let Some(txn) = &self.policy.base.txn {
            txn.on_write_in_doubt(&self.key);
        }
    }
}

/// Apply `ops` to one record and return what the read operations produced.
///
/// A bin read more than once comes back as a list of the values in op order.
/// A read-only operate on a missing record returns `None`.
pub fn operate(
    exec: &Executor,
    policy: &WritePolicy,
    key: &Key,
    ops: &[Operation],
) -> Result<Option<Record>> {
    if ops.is_empty() {
        return Err(Error::InvalidArgument("operate needs at least one operation".into()));
    }
    check_txn(&policy.base, key)?;
    let mut cmd = OperateCommand::new(exec.cluster().as_ref(), policy, key, ops);
    if cmd.flags.has_write {
        if let Some(txn) = &policy.base.txn {
            monitor::add_keys(exec, &policy.base, txn, [key])?;
        }
    }
    exec.execute(&mut cmd)?;
    Ok(cmd.into_record())
}
