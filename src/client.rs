//! Client facade
//!
//! A [`Client`] bundles an [`Executor`] with the policies derived from a
//! [`ClientConfig`] and an optional [`RecordDecoder`]. Every call forwards to
//! the command, batch or transaction crates with those policies.
//!
//! Transactions are joined with [`Client::with_txn`], which returns a client
//! whose policies carry the transaction:
//!
//! ```ignore
//! let txn = client.new_txn();
//! let t = client.with_txn(&txn);
//! t.put(&key, &[Bin::new("a", 1i64)])?;
//! let outcome = client.commit(&txn)?;
//! assert_eq!(outcome.status, CommitStatus::Ok);
//! ```

use meridian_batch::{self as batch, BatchRecord, BatchResults};
use meridian_cluster::{Cluster, Node, StaticCluster};
use meridian_core::{
    serde_decoder, BatchPolicy, Bin, ClientConfig, Error, Key, Operation, ReadPolicy, Record,
    RecordDecoder, Result, Txn, Value, WritePolicy,
};
use meridian_executor::commands::{operate, read, udf, write};
use meridian_executor::Executor;
use meridian_txn::{AbortOutcome, CommitOutcome};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Cluster of `nodes` with the config's preferred racks. Ownership tables
/// are set by the caller.
pub fn static_cluster(config: &ClientConfig, nodes: Vec<Arc<dyn Node>>) -> StaticCluster {
    StaticCluster::new(nodes).with_rack_ids(config.rack_ids.clone())
}

/// Entry point for commands against one cluster
#[derive(Clone)]
pub struct Client {
    exec: Arc<Executor>,
    config: Arc<ClientConfig>,
    read_policy: ReadPolicy,
    write_policy: WritePolicy,
    batch_policy: BatchPolicy,
    decoder: Option<RecordDecoder>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("txn", &self.read_policy.txn.as_ref().map(|t| t.id()))
            .field("decoder", &self.decoder.is_some())
            .finish()
    }
}

impl Client {
    /// Client for `cluster` with policies from `config`.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the config does not validate.
    pub fn new(cluster: Arc<dyn Cluster>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let read_policy = config.read_policy()?;
        let write_policy = config.write_policy()?;
        let batch_policy = config.batch_policy()?;
        debug!(
            target: "meridian::command",
            nodes = cluster.nodes().len(),
            replica = %config.replica,
            concurrent_nodes = config.batch.concurrent_nodes,
            "client created"
        );
        Ok(Client {
            exec: Arc::new(Executor::new(cluster)),
            config: Arc::new(config),
            read_policy,
            write_policy,
            batch_policy,
            decoder: None,
        })
    }

    /// Use `decoder` for [`get_object`](Client::get_object)
    pub fn with_decoder(mut self, decoder: RecordDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Decode records into `T` through serde
    pub fn with_serde_decoder<T>(self) -> Self
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.with_decoder(serde_decoder::<T>())
    }

    /// The command engine
    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    /// Configuration the client was built from
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Default read policy
    pub fn read_policy(&self) -> &ReadPolicy {
        &self.read_policy
    }

    /// Default write policy
    pub fn write_policy(&self) -> &WritePolicy {
        &self.write_policy
    }

    /// Default batch policy
    pub fn batch_policy(&self) -> &BatchPolicy {
        &self.batch_policy
    }

    // ========================================================================
    // Single key
    // ========================================================================

    /// Every bin of a record
    pub fn get(&self, key: &Key) -> Result<Option<Record>> {
        read::get(&self.exec, &self.read_policy, key)
    }

    /// Selected bins of a record
    pub fn get_bins(&self, key: &Key, bins: &[&str]) -> Result<Option<Record>> {
        read::get_bins(&self.exec, &self.read_policy, key, bins)
    }

    /// Generation and expiration of a record
    pub fn get_header(&self, key: &Key) -> Result<Option<Record>> {
        read::get_header(&self.exec, &self.read_policy, key)
    }

    /// Whether a record exists
    pub fn exists(&self, key: &Key) -> Result<bool> {
        read::exists(&self.exec, &self.read_policy, key)
    }

    /// Read a record and map it with the configured decoder.
    ///
    /// # Errors
    ///
    /// `Error::Config` without a decoder, `Error::Decode` when the decoder
    /// fails or produces a type other than `T`.
    pub fn get_object<T: 'static>(&self, key: &Key) -> Result<Option<T>> {
        let decoder = self
            .decoder
            .as_ref()
            .ok_or_else(|| Error::Config("no record decoder configured".into()))?;
        let Some(record) = self.get(key)? else {
            return Ok(None);
        };
        let decoded = decoder(&record)?;
        decoded.downcast::<T>().map(|obj| Some(*obj)).map_err(|_| {
            Error::Decode(format!(
                "decoder did not produce a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Write bins
    pub fn put(&self, key: &Key, bins: &[Bin]) -> Result<()> {
        write::put(&self.exec, &self.write_policy, key, bins)
    }

    /// Append to string or blob bins
    pub fn append(&self, key: &Key, bins: &[Bin]) -> Result<()> {
        write::append(&self.exec, &self.write_policy, key, bins)
    }

    /// Prepend to string or blob bins
    pub fn prepend(&self, key: &Key, bins: &[Bin]) -> Result<()> {
        write::prepend(&self.exec, &self.write_policy, key, bins)
    }

    /// Increment numeric bins
    pub fn add(&self, key: &Key, bins: &[Bin]) -> Result<()> {
        write::add(&self.exec, &self.write_policy, key, bins)
    }

    /// Delete a record; returns whether it existed
    pub fn delete(&self, key: &Key) -> Result<bool> {
        write::delete(&self.exec, &self.write_policy, key)
    }

    /// Reset a record's expiration
    pub fn touch(&self, key: &Key) -> Result<()> {
        write::touch(&self.exec, &self.write_policy, key)
    }

    /// Run operations on one record
    pub fn operate(&self, key: &Key, ops: &[Operation]) -> Result<Option<Record>> {
        operate::operate(&self.exec, &self.write_policy, key, ops)
    }

    /// Call a record UDF
    pub fn execute(&self, key: &Key, package: &str, function: &str, args: &[Value]) -> Result<Option<Value>> {
        udf::execute(&self.exec, &self.write_policy, key, package, function, args)
    }

    // ========================================================================
    // Batch
    // ========================================================================

    /// Whether each key exists
    pub fn batch_exists(&self, keys: &[Key]) -> Result<Vec<Result<bool>>> {
        batch::batch_exists(&self.exec, &self.batch_policy, keys)
    }

    /// Every bin of each key
    pub fn batch_get(&self, keys: &[Key]) -> Result<Vec<Result<Option<Record>>>> {
        batch::batch_get(&self.exec, &self.batch_policy, keys)
    }

    /// Selected bins of each key
    pub fn batch_get_bins(&self, keys: &[Key], bins: &[&str]) -> Result<Vec<Result<Option<Record>>>> {
        batch::batch_get_bins(&self.exec, &self.batch_policy, keys, bins)
    }

    /// Headers of each key
    pub fn batch_get_header(&self, keys: &[Key]) -> Result<Vec<Result<Option<Record>>>> {
        batch::batch_get_header(&self.exec, &self.batch_policy, keys)
    }

    /// Read operations applied to each key
    pub fn batch_get_ops(&self, keys: &[Key], ops: &[Operation]) -> Result<Vec<Result<Option<Record>>>> {
        batch::batch_get_ops(&self.exec, &self.batch_policy, keys, ops)
    }

    /// The same operations applied to every key
    pub fn batch_operate_keys(&self, keys: &[Key], ops: &[Operation]) -> Result<BatchResults> {
        batch::batch_operate_keys(&self.exec, &self.write_batch_policy(), None, keys, ops)
    }

    /// Heterogeneous operations, one per record
    pub fn batch_operate(&self, records: Vec<BatchRecord>) -> Result<BatchResults> {
        batch::batch_operate(&self.exec, &self.write_batch_policy(), records)
    }

    /// Delete every key
    pub fn batch_delete(&self, keys: &[Key]) -> Result<BatchResults> {
        batch::batch_delete(&self.exec, &self.write_batch_policy(), None, keys)
    }

    /// Call a UDF on every key
    pub fn batch_execute(
        &self,
        keys: &[Key],
        package: &str,
        function: &str,
        args: &[Value],
    ) -> Result<BatchResults> {
        batch::batch_execute(&self.exec, &self.write_batch_policy(), None, keys, package, function, args)
    }

    /// Batch policy for calls that may write: retries follow the write policy
    fn write_batch_policy(&self) -> BatchPolicy {
        let mut policy = self.batch_policy.clone();
        policy.base.max_retries = self.write_policy.base.max_retries;
        policy
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// New transaction with the configured timeout
    pub fn new_txn(&self) -> Arc<Txn> {
        Arc::new(Txn::with_timeout(self.config.txn_timeout_secs))
    }

    /// Client whose commands run inside `txn`
    pub fn with_txn(&self, txn: &Arc<Txn>) -> Client {
        let mut client = self.clone();
        client.read_policy.txn = Some(Arc::clone(txn));
        client.write_policy.base.txn = Some(Arc::clone(txn));
        client.batch_policy.base.txn = Some(Arc::clone(txn));
        client
    }

    /// Commit `txn`; the outcome carries the per-key verify and roll records
    pub fn commit(&self, txn: &Arc<Txn>) -> meridian_txn::Result<CommitOutcome> {
        meridian_txn::commit(
            &self.exec,
            &BatchPolicy::txn_verify(),
            &BatchPolicy::txn_roll(),
            txn,
        )
    }

    /// Abort `txn`; the outcome carries the per-key roll records
    pub fn abort(&self, txn: &Arc<Txn>) -> Result<AbortOutcome> {
        meridian_txn::abort(&self.exec, &BatchPolicy::txn_roll(), txn)
    }
}
