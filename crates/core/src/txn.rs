//! Multi-record transaction bookkeeping
//!
//! A [`Txn`] is created by the caller, attached to policies, and consulted by
//! every command issued under it. It records:
//! - the read-set: digest → version observed by a read
//! - the write-set: digests written (or possibly written) by the transaction
//! - the namespace all keys must share
//! - deadline and in-doubt flags that drive commit, abort and monitor cleanup
//!
//! The read-set and write-set are mutually exclusive. A digest moves from the
//! read-set to the write-set on an unversioned write and never moves back.
//!
//! All state sits behind one `parking_lot::Mutex` because parallel batch
//! workers of the same transaction update it concurrently.

use crate::error::{Error, Result};
use crate::key::{Digest, Key};
use crate::result_code::ResultCode;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle state of a transaction. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// Accepting commands
    Open,
    /// Reads verified, roll-forward pending
    Verified,
    /// Rolled forward (or roll-forward is in progress)
    Committed,
    /// Rolled back (or roll-back is in progress)
    Aborted,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnState::Open => "open",
            TxnState::Verified => "verified",
            TxnState::Committed => "committed",
            TxnState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Reserved set holding transaction monitor records
pub const MONITOR_SET: &str = "<ERO~MRT";

// ============================================================================
// Id generation
// ============================================================================

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

static TXN_ID_STATE: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(rand::random::<u64>()));

fn splitmix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Next transaction id. Never zero.
pub fn next_txn_id() -> u64 {
    loop {
        let state = TXN_ID_STATE
            .fetch_add(GOLDEN_GAMMA, Ordering::Relaxed)
            .wrapping_add(GOLDEN_GAMMA);
        let id = splitmix64(state);
        if id != 0 {
            return id;
        }
    }
}

// ============================================================================
// Txn
// ============================================================================

#[derive(Debug)]
struct TxnInner {
    state: TxnState,
    namespace: Option<String>,
    reads: FxHashMap<Digest, (Key, u64)>,
    writes: FxHashMap<Digest, Key>,
    deadline: u32,
    timeout: u32,
    monitor_in_doubt: bool,
    write_in_doubt: bool,
    in_doubt: bool,
}

/// Multi-record transaction handle.
///
/// Shared between the caller and the policies of every command issued under
/// it, normally as `Arc<Txn>`.
pub struct Txn {
    id: u64,
    inner: Mutex<TxnInner>,
}

impl Txn {
    /// Create a transaction using the server's default timeout.
    pub fn new() -> Self {
        Txn::with_timeout(0)
    }

    /// Create a transaction that expires `timeout_secs` after its first write.
    /// Zero selects the server default.
    pub fn with_timeout(timeout_secs: u32) -> Self {
        Txn {
            id: next_txn_id(),
            inner: Mutex::new(TxnInner {
                state: TxnState::Open,
                namespace: None,
                reads: FxHashMap::default(),
                writes: FxHashMap::default(),
                deadline: 0,
                timeout: timeout_secs,
                monitor_in_doubt: false,
                write_in_doubt: false,
                in_doubt: false,
            }),
        }
    }

    /// Transaction id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state
    pub fn state(&self) -> TxnState {
        self.inner.lock().state
    }

    /// Move to a new state
    pub fn set_state(&self, state: TxnState) {
        self.inner.lock().state = state;
    }

    /// Fail unless the transaction still accepts commands.
    pub fn verify_command(&self) -> Result<()> {
        let state = self.state();
        if state != TxnState::Open {
            return Err(Error::TxnClosed { id: self.id, state });
        }
        Ok(())
    }

    /// Namespace fixed by the first key, if any
    pub fn namespace(&self) -> Option<String> {
        self.inner.lock().namespace.clone()
    }

    /// Fix the namespace on first use, or check it matches.
    pub fn set_namespace(&self, namespace: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        match &inner.namespace {
            None => {
                inner.namespace = Some(namespace.to_string());
                Ok(())
            }
            Some(ns) if ns == namespace => Ok(()),
            Some(ns) => Err(Error::TxnNamespace {
                expected: ns.clone(),
                actual: namespace.to_string(),
            }),
        }
    }

    /// Check every key against the transaction namespace.
    pub fn set_namespace_keys<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> Result<()> {
        for key in keys {
            self.set_namespace(key.namespace())?;
        }
        Ok(())
    }

    /// Record the version returned by a read.
    ///
    /// Keys already in the write-set are left alone.
    pub fn on_read(&self, key: &Key, version: Option<u64>) {
        let Some(version) = version else { return };
        let mut inner = self.inner.lock();
        if !inner.writes.contains_key(key.digest()) {
            inner.reads.insert(*key.digest(), (key.clone(), version));
        }
    }

    /// Version recorded for a key by an earlier read
    pub fn read_version(&self, digest: &Digest) -> Option<u64> {
        self.inner.lock().reads.get(digest).map(|(_, v)| *v)
    }

    /// Apply the outcome of a write.
    ///
    /// A versioned reply (write-after-read that the server did not apply yet)
    /// refreshes the read-set entry. An unversioned `OK` moves the key into
    /// the write-set.
    pub fn on_write(&self, key: &Key, version: Option<u64>, code: ResultCode) {
        let mut inner = self.inner.lock();
        match version {
            Some(v) => {
                if !inner.writes.contains_key(key.digest()) {
                    inner.reads.insert(*key.digest(), (key.clone(), v));
                }
            }
            None => {
                if code.is_ok() {
                    inner.reads.remove(key.digest());
                    inner.writes.insert(*key.digest(), key.clone());
                }
            }
        }
    }

    /// Record a write whose outcome is unknown. The key must be rolled.
    pub fn on_write_in_doubt(&self, key: &Key) {
        let mut inner = self.inner.lock();
        inner.write_in_doubt = true;
        inner.reads.remove(key.digest());
        inner.writes.insert(*key.digest(), key.clone());
    }

    /// Whether a key is already in the write-set
    pub fn write_exists(&self, digest: &Digest) -> bool {
        self.inner.lock().writes.contains_key(digest)
    }

    /// Snapshot of the read-set
    pub fn reads(&self) -> Vec<(Key, u64)> {
        self.inner.lock().reads.values().cloned().collect()
    }

    /// Snapshot of the write-set
    pub fn writes(&self) -> Vec<Key> {
        self.inner.lock().writes.values().cloned().collect()
    }

    /// Number of keys in the read-set
    pub fn read_count(&self) -> usize {
        self.inner.lock().reads.len()
    }

    /// Number of keys in the write-set
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes.len()
    }

    /// Server-assigned deadline; 0 until the monitor record exists
    pub fn deadline(&self) -> u32 {
        self.inner.lock().deadline
    }

    /// Store the deadline returned with the monitor record
    pub fn set_deadline(&self, deadline: u32) {
        self.inner.lock().deadline = deadline;
    }

    /// Timeout in seconds sent with the first monitor write
    pub fn timeout(&self) -> u32 {
        self.inner.lock().timeout
    }

    /// Change the timeout (only meaningful before the first write)
    pub fn set_timeout(&self, timeout_secs: u32) {
        self.inner.lock().timeout = timeout_secs;
    }

    /// The monitor add-keys command ended in doubt
    pub fn set_monitor_in_doubt(&self) {
        self.inner.lock().monitor_in_doubt = true;
    }

    /// Whether the monitor record is known to exist
    pub fn monitor_exists(&self) -> bool {
        self.inner.lock().deadline != 0
    }

    /// Whether the monitor record exists or may have been created
    pub fn monitor_might_exist(&self) -> bool {
        let inner = self.inner.lock();
        inner.deadline != 0 || inner.monitor_in_doubt
    }

    /// Whether any write ended in doubt
    pub fn write_in_doubt(&self) -> bool {
        self.inner.lock().write_in_doubt
    }

    /// Whether commit ended with an unknown outcome
    pub fn in_doubt(&self) -> bool {
        self.inner.lock().in_doubt
    }

    /// Flag the commit outcome as unknown
    pub fn set_in_doubt(&self, in_doubt: bool) {
        self.inner.lock().in_doubt = in_doubt;
    }

    /// Whether closing should delete the monitor record.
    ///
    /// An in-doubt write leaves the monitor for server-side recovery.
    pub fn close_monitor(&self) -> bool {
        let inner = self.inner.lock();
        inner.deadline != 0 && !inner.write_in_doubt
    }

    /// Forget all keys after the transaction has been closed.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.namespace = None;
        inner.deadline = 0;
        inner.reads.clear();
        inner.writes.clear();
    }
}

impl Default for Txn {
    fn default() -> Self {
        Txn::new()
    }
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Txn")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("namespace", &inner.namespace)
            .field("reads", &inner.reads.len())
            .field("writes", &inner.writes.len())
            .field("deadline", &inner.deadline)
            .finish()
    }
}
