//! Multi-record transactions for Meridian
//!
//! Commands join a transaction by carrying a [`Txn`] in their policy. The
//! commands themselves keep the read-set and write-set current and register
//! written keys with the transaction's monitor record. This crate finishes
//! the transaction:
//! - [`commit`]: verify the read-set, then roll the write-set forward
//! - [`abort`]: roll the write-set back
//!
//! Both close the monitor record afterwards unless a write was left in
//! doubt, in which case the server recovers the transaction from it.
//!
//! # Example
//!
//! ```ignore
//! let txn = Arc::new(Txn::new());
//! let policy = WritePolicy::from_base(BasePolicy::default().with_txn(txn.clone()));
//! write::put(&exec, &policy, &key, &[Bin::new("a", 1i64)])?;
//! let outcome = commit(&exec, &BatchPolicy::txn_verify(), &BatchPolicy::txn_roll(), &txn)?;
//! assert_eq!(outcome.status, CommitStatus::Ok);
//! ```
//!
//! [`Txn`]: meridian_core::Txn

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
mod roll;

pub use error::{
    AbortOutcome, AbortStatus, CommitError, CommitErrorKind, CommitOutcome, CommitStatus, Result,
    TxnError,
};
pub use roll::{abort, commit};
