//! Core types for Meridian
//!
//! This crate defines the types shared by every layer of the driver:
//! - Key / Digest: record identity and partition routing
//! - Value / ParticleType: typed bin values
//! - Record: bins plus generation and expiration
//! - Operation / Bin: operate entries, including list (CDT) operations
//! - ResultCode / Error: server codes and the error taxonomy
//! - Policies: timeouts, retries, replica selection, write and batch knobs
//! - ClientConfig: `meridian.toml`
//! - Txn: multi-record transaction bookkeeping
//! - RecordDecoder: optional record-to-object mapping

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod decoder;
pub mod error;
pub mod key;
pub mod operation;
pub mod policy;
pub mod record;
pub mod result_code;
pub mod txn;
pub mod value;

pub use config::{BatchConfig, ClientConfig, CONFIG_FILE_NAME};
pub use decoder::{serde_decoder, RecordDecoder};
pub use error::{Error, Result};
pub use key::{Digest, Key, DIGEST_SIZE, PARTITIONS};
pub use operation::{list, Bin, Operation, OperationType};
pub use policy::{
    BasePolicy, BatchDeletePolicy, BatchPolicy, BatchReadPolicy, BatchUdfPolicy,
    BatchWritePolicy, CommitLevel, Expiration, GenerationPolicy, ReadModeSc, ReadPolicy,
    RecordExistsAction, Replica, WritePolicy,
};
pub use record::Record;
pub use result_code::ResultCode;
pub use txn::{Txn, TxnState, MONITOR_SET};
pub use value::{ParticleType, Value};
