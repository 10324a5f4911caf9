//! Command policies
//!
//! Policies are plain values read by commands; commands never mutate them.
//! [`BasePolicy`] carries the timeout/retry knobs every command needs and the
//! optional transaction. Write and batch policies wrap it.

use crate::txn::Txn;
use std::sync::Arc;
use std::time::Duration;

/// Which replica of a partition services a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replica {
    /// Always the master
    Master,
    /// Round-robin over master and replicas
    MasterProles,
    /// Master first, then each replica in order on retry
    Sequence,
    /// Replicas on one of the client's racks first, then `Sequence`
    PreferRack,
    /// A random replica of the partition
    Random,
}

impl Replica {
    /// Parse a config name (`"master"`, `"sequence"`, ...).
    pub fn from_name(name: &str) -> Option<Replica> {
        Some(match name {
            "master" => Replica::Master,
            "master_proles" => Replica::MasterProles,
            "sequence" => Replica::Sequence,
            "prefer_rack" => Replica::PreferRack,
            "random" => Replica::Random,
            _ => return None,
        })
    }
}

/// Read consistency for strong-consistency namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadModeSc {
    /// Session consistency
    Session,
    /// Linearizable reads; client timeouts do not move to another replica
    Linearize,
    /// Any replica when the master is unavailable
    AllowReplica,
    /// Possibly stale reads from unavailable partitions
    AllowUnavailable,
}

/// Behaviour when the record already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordExistsAction {
    /// Create or merge bins
    Update,
    /// Merge bins; fail when the record is missing
    UpdateOnly,
    /// Create or replace all bins
    Replace,
    /// Replace all bins; fail when the record is missing
    ReplaceOnly,
    /// Create; fail when the record exists
    CreateOnly,
}

/// Generation check applied to writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPolicy {
    /// No check
    None,
    /// Write only if the generation equals the expected value
    ExpectGenEqual,
    /// Write only if the expected value is greater than the generation
    ExpectGenGt,
}

/// Replication acknowledgement level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitLevel {
    /// Wait for master and replicas
    CommitAll,
    /// Wait for master only
    CommitMaster,
}

/// Record expiration sent with a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Namespace default TTL
    NamespaceDefault,
    /// Expire after this many seconds
    Seconds(u32),
    /// Never expire
    Never,
    /// Keep the record's current TTL
    DontUpdate,
}

impl Expiration {
    /// Wire value
    pub fn as_u32(self) -> u32 {
        match self {
            Expiration::NamespaceDefault => 0,
            Expiration::Seconds(s) => s,
            Expiration::Never => u32::MAX,
            Expiration::DontUpdate => u32::MAX - 1,
        }
    }
}

// ============================================================================
// BasePolicy
// ============================================================================

/// Knobs shared by every command
#[derive(Debug, Clone)]
pub struct BasePolicy {
    /// Deadline for the whole call, retries included; zero disables it
    pub total_timeout: Duration,
    /// Per-attempt socket timeout; zero means the remaining total budget
    pub socket_timeout: Duration,
    /// Time allowed for draining a timed-out connection before closing it
    pub timeout_delay: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Sleep before the first retry
    pub sleep_between_retries: Duration,
    /// Multiplier applied to the sleep on each further retry (1.0 = constant)
    pub sleep_multiplier: f64,
    /// Replica selection for reads
    pub replica: Replica,
    /// Read consistency for SC namespaces
    pub read_mode_sc: ReadModeSc,
    /// Ask the server to compress the response and compress large requests
    pub use_compression: bool,
    /// Send the user key along with the digest
    pub send_key: bool,
    /// Surface filtered-out records as errors on single-key commands
    pub fail_on_filtered_out: bool,
    /// Transaction the command belongs to
    pub txn: Option<Arc<Txn>>,
}

impl Default for BasePolicy {
    fn default() -> Self {
        BasePolicy {
            total_timeout: Duration::from_millis(1000),
            socket_timeout: Duration::from_secs(30),
            timeout_delay: Duration::ZERO,
            max_retries: 2,
            sleep_between_retries: Duration::ZERO,
            sleep_multiplier: 1.0,
            replica: Replica::Sequence,
            read_mode_sc: ReadModeSc::Session,
            use_compression: false,
            send_key: false,
            fail_on_filtered_out: false,
            txn: None,
        }
    }
}

impl BasePolicy {
    /// Attach a transaction
    pub fn with_txn(mut self, txn: Arc<Txn>) -> Self {
        self.txn = Some(txn);
        self
    }

    /// Backoff before retry number `iteration` (0-based).
    pub fn retry_delay(&self, iteration: u32) -> Duration {
        if self.sleep_between_retries.is_zero() {
            return Duration::ZERO;
        }
        let factor = self.sleep_multiplier.max(1.0).powi(iteration as i32);
        let secs = self.sleep_between_retries.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Read commands use the base policy directly
pub type ReadPolicy = BasePolicy;

// ============================================================================
// WritePolicy
// ============================================================================

/// Policy for single-key writes
#[derive(Debug, Clone)]
pub struct WritePolicy {
    /// Shared knobs
    pub base: BasePolicy,
    /// Behaviour when the record exists
    pub record_exists_action: RecordExistsAction,
    /// Generation check
    pub generation_policy: GenerationPolicy,
    /// Expected generation
    pub generation: u32,
    /// Expiration to set
    pub expiration: Expiration,
    /// Replication acknowledgement level
    pub commit_level: CommitLevel,
    /// Leave a tombstone on delete
    pub durable_delete: bool,
    /// Return one result per operation on operate
    pub respond_per_each_op: bool,
}

impl Default for WritePolicy {
    fn default() -> Self {
        WritePolicy {
            base: BasePolicy {
                max_retries: 0,
                ..BasePolicy::default()
            },
            record_exists_action: RecordExistsAction::Update,
            generation_policy: GenerationPolicy::None,
            generation: 0,
            expiration: Expiration::NamespaceDefault,
            commit_level: CommitLevel::CommitAll,
            durable_delete: false,
            respond_per_each_op: false,
        }
    }
}

impl WritePolicy {
    /// Write policy with a base policy
    pub fn from_base(base: BasePolicy) -> Self {
        WritePolicy {
            base,
            ..WritePolicy::default()
        }
    }
}

// ============================================================================
// Batch policies
// ============================================================================

/// Policy for a batch call as a whole
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Shared knobs
    pub base: BasePolicy,
    /// 1 = nodes in sequence, 0 = one thread per node, n = at most n threads
    pub concurrent_nodes: usize,
    /// Keep going past per-node failures and report them per key
    pub allow_partial_results: bool,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        BatchPolicy {
            base: BasePolicy::default(),
            concurrent_nodes: 1,
            allow_partial_results: true,
        }
    }
}

impl BatchPolicy {
    /// Default parent policy for batches that write
    pub fn write_default() -> Self {
        BatchPolicy {
            base: BasePolicy {
                max_retries: 0,
                ..BasePolicy::default()
            },
            ..BatchPolicy::default()
        }
    }

    /// Policy for the transaction verify phase
    pub fn txn_verify() -> Self {
        BatchPolicy {
            base: BasePolicy {
                replica: Replica::Master,
                read_mode_sc: ReadModeSc::Linearize,
                max_retries: 5,
                socket_timeout: Duration::from_secs(3),
                total_timeout: Duration::from_secs(10),
                sleep_between_retries: Duration::from_secs(1),
                ..BasePolicy::default()
            },
            ..BatchPolicy::default()
        }
    }

    /// Policy for transaction roll-forward and roll-back
    pub fn txn_roll() -> Self {
        BatchPolicy {
            base: BasePolicy {
                replica: Replica::Master,
                max_retries: 5,
                socket_timeout: Duration::from_secs(3),
                total_timeout: Duration::from_secs(10),
                sleep_between_retries: Duration::from_secs(1),
                ..BasePolicy::default()
            },
            ..BatchPolicy::default()
        }
    }
}

/// Per-record policy for batch reads
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReadPolicy {
    /// Read consistency
    pub read_mode_sc: ReadModeSc,
}

impl Default for BatchReadPolicy {
    fn default() -> Self {
        BatchReadPolicy {
            read_mode_sc: ReadModeSc::Session,
        }
    }
}

/// Per-record policy for batch writes
#[derive(Debug, Clone, PartialEq)]
pub struct BatchWritePolicy {
    /// Behaviour when the record exists
    pub record_exists_action: RecordExistsAction,
    /// Generation check
    pub generation_policy: GenerationPolicy,
    /// Expected generation
    pub generation: u32,
    /// Expiration to set
    pub expiration: Expiration,
    /// Replication acknowledgement level
    pub commit_level: CommitLevel,
    /// Leave a tombstone on delete
    pub durable_delete: bool,
    /// Send the user key
    pub send_key: bool,
}

impl Default for BatchWritePolicy {
    fn default() -> Self {
        BatchWritePolicy {
            record_exists_action: RecordExistsAction::Update,
            generation_policy: GenerationPolicy::None,
            generation: 0,
            expiration: Expiration::NamespaceDefault,
            commit_level: CommitLevel::CommitAll,
            durable_delete: false,
            send_key: false,
        }
    }
}

/// Per-record policy for batch deletes
#[derive(Debug, Clone, PartialEq)]
pub struct BatchDeletePolicy {
    /// Generation check
    pub generation_policy: GenerationPolicy,
    /// Expected generation
    pub generation: u32,
    /// Replication acknowledgement level
    pub commit_level: CommitLevel,
    /// Leave a tombstone
    pub durable_delete: bool,
    /// Send the user key
    pub send_key: bool,
}

impl Default for BatchDeletePolicy {
    fn default() -> Self {
        BatchDeletePolicy {
            generation_policy: GenerationPolicy::None,
            generation: 0,
            commit_level: CommitLevel::CommitAll,
            durable_delete: false,
            send_key: false,
        }
    }
}

/// Per-record policy for batch UDF calls
#[derive(Debug, Clone, PartialEq)]
pub struct BatchUdfPolicy {
    /// Expiration to set
    pub expiration: Expiration,
    /// Replication acknowledgement level
    pub commit_level: CommitLevel,
    /// Leave a tombstone if the UDF deletes
    pub durable_delete: bool,
    /// Send the user key
    pub send_key: bool,
}

impl Default for BatchUdfPolicy {
    fn default() -> Self {
        BatchUdfPolicy {
            expiration: Expiration::NamespaceDefault,
            commit_level: CommitLevel::CommitAll,
            durable_delete: false,
            send_key: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let read = ReadPolicy::default();
        assert_eq!(read.max_retries, 2);
        assert_eq!(read.total_timeout, Duration::from_millis(1000));
        let write = WritePolicy::default();
        assert_eq!(write.base.max_retries, 0);
        assert_eq!(BatchPolicy::default().concurrent_nodes, 1);
    }

    #[test]
    fn test_retry_delay_multiplies() {
        let p = BasePolicy {
            sleep_between_retries: Duration::from_millis(10),
            sleep_multiplier: 2.0,
            ..BasePolicy::default()
        };
        assert_eq!(p.retry_delay(0), Duration::from_millis(10));
        assert_eq!(p.retry_delay(2), Duration::from_millis(40));
    }

    #[test]
    fn test_retry_delay_linear_and_zero() {
        let p = BasePolicy {
            sleep_between_retries: Duration::from_millis(5),
            ..BasePolicy::default()
        };
        assert_eq!(p.retry_delay(3), Duration::from_millis(5));
        assert_eq!(BasePolicy::default().retry_delay(1), Duration::ZERO);
    }

    #[test]
    fn test_expiration_wire_values() {
        assert_eq!(Expiration::NamespaceDefault.as_u32(), 0);
        assert_eq!(Expiration::Never.as_u32(), u32::MAX);
        assert_eq!(Expiration::DontUpdate.as_u32(), 0xFFFF_FFFE);
        assert_eq!(Expiration::Seconds(60).as_u32(), 60);
    }

    #[test]
    fn test_txn_policies_target_master() {
        assert_eq!(BatchPolicy::txn_verify().base.replica, Replica::Master);
        assert_eq!(BatchPolicy::txn_roll().base.max_retries, 5);
    }

    #[test]
    fn test_replica_names() {
        assert_eq!(Replica::from_name("prefer_rack"), Some(Replica::PreferRack));
        assert_eq!(Replica::from_name("nearest"), None);
    }
}
