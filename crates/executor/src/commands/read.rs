//! Single-key reads

use super::{check_txn, write_txn_fields};
use crate::command::{key_affinity, Command};
use crate::engine::Executor;
use crate::reader::ResponseReader;
use meridian_cluster::{Cluster, Node, Partition};
use meridian_core::{
    BasePolicy, Error, Key, Operation, ReadPolicy, Record, Result, ResultCode,
};
use meridian_proto::MessageBuilder;
use std::sync::Arc;

/// What a read asks for
#[derive(Debug, Clone, PartialEq)]
pub enum ReadShape {
    /// Every bin
    All,
    /// The named bins
    Bins(Vec<String>),
    /// Generation and expiration only
    Header,
}

/// Read of one record
pub struct ReadCommand {
    name: &'static str,
    key: Key,
    policy: ReadPolicy,
    partition: Partition,
    shape: ReadShape,
    record: Option<Record>,
}

impl ReadCommand {
    /// Read `key` with the given shape
    pub fn new(cluster: &dyn Cluster, policy: &ReadPolicy, key: &Key, shape: ReadShape) -> Self {
        let name = match shape {
            ReadShape::Header => "get_header",
            _ => "get",
        };
        ReadCommand {
            name,
            key: key.clone(),
            policy: policy.clone(),
            partition: Partition::read(cluster, key, policy.replica, policy.read_mode_sc),
            shape,
            record: None,
        }
    }

    /// The record read, `None` when not found
    pub fn into_record(self) -> Option<Record> {
        self.record
    }
}

impl Command for ReadCommand {
    fn name(&self) -> &'static str {
        self.name
    }

    fn policy(&self) -> &BasePolicy {
        &self.policy
    }

    fn is_write(&self) -> bool {
        false
    }

    fn affinity(&self) -> u32 {
        key_affinity(&self.key)
    }

    fn select_node(&mut self, cluster: &dyn Cluster) -> Result<Arc<dyn Node>> {
        self.partition.node_read(cluster)
    }

    fn build_request(&mut self) -> Result<Vec<u8>> {
        let mut b = MessageBuilder::new();
        b.read_attrs(
            &self.policy,
            self.shape == ReadShape::All,
            self.shape == ReadShape::Header,
        );
        b.key_fields(&self.key, self.policy.send_key)?;
        write_txn_fields(&mut b, self.policy.txn.as_deref(), &self.key, false);
        if let ReadShape::Bins(names) = &self.shape {
            for name in names {
                b.op(&Operation::get_bin(name.as_str()))?;
            }
        }
        b.finish(self.policy.use_compression)
    }

    fn parse_response(&mut self, reader: &mut ResponseReader<'_>) -> Result<()> {
        let msg = reader.read_message()?;
        if let Some(txn) = &self.policy.txn {
            txn.on_read(&self.key, msg.version()?);
        }
        self.record = match msg.result_code() {
            ResultCode::OK => Some(msg.record(false)?),
            ResultCode::KEY_NOT_FOUND => None,
            ResultCode::FILTERED_OUT if !self.policy.fail_on_filtered_out => None,
            code => return Err(Error::server(code)),
        };
        Ok(())
    }

    fn prepare_retry(&mut self, is_timeout: bool) -> bool {
        self.partition.prepare_retry_read(is_timeout);
        true
    }
}

// ============================================================================
// Operations
// ============================================================================

fn run(exec: &Executor, policy: &ReadPolicy, key: &Key, shape: ReadShape) -> Result<Option<Record>> {
    check_txn(policy, key)?;
    let mut cmd = ReadCommand::new(exec.cluster().as_ref(), policy, key, shape);
    exec.execute(&mut cmd)?;
    Ok(cmd.into_record())
}

/// Read every bin of a record. Returns `None` when the key does not exist.
pub fn get(exec: &Executor, policy: &ReadPolicy, key: &Key) -> Result<Option<Record>> {
    run(exec, policy, key, ReadShape::All)
}

/// Read the named bins of a record.
pub fn get_bins(
    exec: &Executor,
    policy: &ReadPolicy,
    key: &Key,
    bins: &[&str],
) -> Result<Option<Record>> {
    let names = bins.iter().map(|b| b.to_string()).collect();
    run(exec, policy, key, ReadShape::Bins(names))
}

/// Read generation and expiration without bins.
pub fn get_header(exec: &Executor, policy: &ReadPolicy, key: &Key) -> Result<Option<Record>> {
    run(exec, policy, key, ReadShape::Header)
}

/// Whether a record exists.
pub fn exists(exec: &Executor, policy: &ReadPolicy, key: &Key) -> Result<bool> {
    Ok(get_header(exec, policy, key)?.is_some())
}
