//! Meridian - client driver for a partitioned, replicated key-value cluster
//!
//! Records live in 4096 partitions per namespace, each owned by a master
//! node and zero or more replicas. The driver routes every command to the
//! owning node, retries it within a deadline, fans batches out across
//! nodes and coordinates multi-record transactions.
//!
//! # Quick Start
//!
//! ```ignore
//! use meridian::{Bin, Client, ClientConfig, Key};
//!
//! let config = ClientConfig::from_file(Path::new(CONFIG_FILE_NAME))?;
//! let client = Client::new(cluster, config)?;
//!
//! let key = Key::new("test", "users", "alice")?;
//! client.put(&key, &[Bin::new("age", 31i64)])?;
//! let record = client.get(&key)?;
//! ```
//!
//! # Crates
//!
//! - `meridian-core`: keys, values, policies, errors, transactions
//! - `meridian-proto`: wire messages
//! - `meridian-cluster`: nodes, connections, partition tables
//! - `meridian-executor`: the command engine and single-key commands
//! - `meridian-batch`: multi-key commands
//! - `meridian-txn`: commit and abort

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;

pub use client::{static_cluster, Client};

pub use meridian_batch::{BatchOperation, BatchRecord, BatchResults, ReadBins, UdfCall};
pub use meridian_cluster::{Cluster, Node, Partitions, StaticCluster, TcpNode};
pub use meridian_core::{
    serde_decoder, BasePolicy, BatchPolicy, Bin, ClientConfig, Error, Key, Operation, ReadPolicy,
    Record, RecordDecoder, Replica, Result, ResultCode, Txn, TxnState, Value, WritePolicy,
    CONFIG_FILE_NAME,
};
pub use meridian_executor::Executor;
pub use meridian_txn::{
    AbortOutcome, AbortStatus, CommitError, CommitErrorKind, CommitOutcome, CommitStatus, TxnError,
};

/// Crates behind the facade, for callers that need the lower layers
pub mod crates {
    pub use meridian_batch as batch;
    pub use meridian_cluster as cluster;
    pub use meridian_core as core;
    pub use meridian_executor as executor;
    pub use meridian_proto as proto;
    pub use meridian_txn as txn;
}
