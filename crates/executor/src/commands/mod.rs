//! Single-key commands
//!
//! Each submodule holds the command types for one group of operations and
//! the free functions that build, execute and unwrap them:
//!
//! | Module | Operations |
//! |--------|------------|
//! | `read` | get, get_bins, get_header, exists |
//! | `write` | put, append, prepend, add, delete, touch |
//! | `operate` | operate |
//! | `udf` | execute |
//! | `monitor` | transaction monitor add-keys, mark roll-forward, close |

pub mod monitor;
pub mod operate;
pub mod read;
pub mod udf;
pub mod write;

use meridian_core::{BasePolicy, Key, Result, Txn};
use meridian_proto::MessageBuilder;

/// Add the transaction id, the read version of `key` and, for writes, the
/// monitor deadline.
pub(crate) fn write_txn_fields(b: &mut MessageBuilder, txn: Option<&Txn>, key: &Key, is_write: bool) {
    if let Some(txn) = txn {
        let version = txn.read_version(key.digest());
        let deadline = if is_write {
            Some(txn.deadline()).filter(|d| *d != 0)
        } else {
            None
        };
        b.txn_fields(txn.id(), version, deadline);
    }
}

/// Check that the transaction, if any, accepts a command on `key`.
pub(crate) fn check_txn(policy: &BasePolicy, key: &Key) -> Result<()> {
    if let Some(txn) = &policy.txn {
        txn.verify_command()?;
        txn.set_namespace(key.namespace())?;
    }
    Ok(())
}

