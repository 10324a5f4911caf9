//! Batch dispatch for Meridian
//!
//! A batch call groups its keys by the node that owns them, sends one
//! request per node and writes every answer back into the caller's slot by
//! batch index:
//! - [`BatchRecord`]: one key, one [`BatchOperation`] and its outcome
//! - key-list calls: [`batch_exists`], [`batch_get`], [`batch_get_bins`],
//!   [`batch_get_header`], [`batch_get_ops`]
//! - record calls: [`batch_operate`], [`batch_operate_keys`],
//!   [`batch_delete`], [`batch_execute`]
//! - transaction passes: [`txn_verify`], [`txn_roll`]
//!
//! Each per-node request runs through the same [`Executor`] retry loop as a
//! single-key command. A node that owns one key gets a plain single-key
//! request instead of a batch envelope.
//!
//! # Example
//!
//! ```ignore
//! let exec = Executor::new(cluster);
//! let found = batch_exists(&exec, &BatchPolicy::default(), &keys)?;
//! ```
//!
//! [`Executor`]: meridian_executor::Executor

#![warn(missing_docs)]
#![warn(clippy::all)]

mod command;
mod dispatch;
mod entry;
mod node;
mod ops;
pub mod record;

pub use entry::TxnPass;
pub use ops::{
    batch_delete, batch_execute, batch_exists, batch_get, batch_get_bins, batch_get_header,
    batch_get_ops, batch_operate, batch_operate_keys, txn_roll, txn_verify,
};
pub use record::{BatchOperation, BatchRecord, BatchResults, ReadBins, UdfCall};
