//! Record UDF execution

use super::{check_txn, monitor, write_txn_fields};
use crate::command::{key_affinity, Command};
use crate::engine::Executor;
use crate::reader::ResponseReader;
use meridian_cluster::{Cluster, Node, Partition};
use meridian_core::{BasePolicy, Error, Key, Result, ResultCode, Value, WritePolicy};
use meridian_proto::MessageBuilder;
use std::sync::Arc;

/// Bin carrying the function's return value
pub const SUCCESS_BIN: &str = "SUCCESS";
/// Bin carrying the failure text
pub const FAILURE_BIN: &str = "FAILURE";

/// Call of a server-side function on one record
pub struct ExecuteCommand {
    key: Key,
    policy: WritePolicy,
    partition: Partition,
    package: String,
    function: String,
    args: Vec<Value>,
    result: Option<Value>,
}

impl ExecuteCommand {
    /// Call `package.function(args)` on `key`
    pub fn new(policy: &WritePolicy, key: &Key, package: &str, function: &str, args: &[Value]) -> Self {
        ExecuteCommand {
            key: key.clone(),
            policy: policy.clone(),
            partition: Partition::write(key, policy.base.replica),
            package: package.to_string(),
            function: function.to_string(),
            args: args.to_vec(),
            result: None,
        }
    }

    /// Returned value, `None` when the function returned nothing
    pub fn into_result(self) -> Option<Value> {
        self.result
    }
}

impl Command for ExecuteCommand {
    fn name(&self) -> &'static str {
        "execute"
    }

    fn policy(&self) -> &BasePolicy {
        &self.policy.base
    }

    fn is_write(&self) -> bool {
        true
    }

    fn is_idempotent(&self) -> bool {
        false
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
        b.key_fields(&self.key, self.policy.base.send_key)?;
        write_txn_fields(&mut b, self.policy.base.txn.as_deref(), &self.key, true);
        b.udf_fields(&self.package, &self.function, &self.args)?;
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
                let mut record = msg.record(false)?;
                self.result = record.bins.remove(SUCCESS_BIN);
                Ok(())
            }
            ResultCode::UDF_BAD_RESPONSE => {
                let record = msg.record(false)?;
                let message = match record.get(FAILURE_BIN) {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                    None => None,
                };
                Err(Error::Server {
                    code,
                    node: None,
                    in_doubt: false,
                    message,
                })
            }
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

/// Run a record UDF and return its result.
///
/// # Errors
///
/// A function failure surfaces as `Error::Server` with code
/// `UDF_BAD_RESPONSE` and the server's failure text as the message.
pub fn execute(
    exec: &Executor,
    policy: &WritePolicy,
    key: &Key,
    package: &str,
    function: &str,
    args: &[Value],
) -> Result<Option<Value>> {
    check_txn(&policy.base, key)?;
    if let Some(txn) = &policy.base.txn {
        monitor::add_keys(exec, &policy.base, txn, [key])?;
    }
    let mut cmd = ExecuteCommand::new(policy, key, package, function, args);
    exec.execute(&mut cmd)?;
    Ok(cmd.into_result())
}
