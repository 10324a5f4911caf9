//! Batch records
//!
//! A record variant call takes a list of [`BatchRecord`]s, each naming a key
//! and one [`BatchOperation`]. Results are written back into the record that
//! asked for them.
//!
//! Policies and op lists are shared through `Arc`. Two neighbouring entries
//! whose operation points at the same policy and op list are sent as one
//! full entry followed by a one-byte repeat marker.

use meridian_core::{
    BatchDeletePolicy, BatchReadPolicy, BatchUdfPolicy, BatchWritePolicy, Error, Key, Operation,
    OperationType, Record, ResultCode, Value,
};
use std::sync::Arc;

/// Bins a batch read asks for
#[derive(Debug, Clone)]
pub enum ReadBins {
    /// Every bin
    All,
    /// Named bins
    Names(Arc<[String]>),
    /// Generation and expiration only
    Header,
    /// Read operations
    Ops(Arc<[Operation]>),
}

impl ReadBins {
    /// Named bins from string slices
    pub fn names(names: &[&str]) -> Self {
        ReadBins::Names(names.iter().map(|n| n.to_string()).collect())
    }

    fn same_as(&self, other: &ReadBins) -> bool {
        match (self, other) {
            (ReadBins::All, ReadBins::All) | (ReadBins::Header, ReadBins::Header) => true,
            (ReadBins::Names(a), ReadBins::Names(b)) => Arc::ptr_eq(a, b),
            (ReadBins::Ops(a), ReadBins::Ops(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Server-side function call
#[derive(Debug, Clone, PartialEq)]
pub struct UdfCall {
    /// Registered package
    pub package: String,
    /// Function name
    pub function: String,
    /// Arguments
    pub args: Vec<Value>,
}

impl UdfCall {
    /// Call of `package.function(args)`
    pub fn new(package: &str, function: &str, args: &[Value]) -> Self {
        UdfCall {
            package: package.to_string(),
            function: function.to_string(),
            args: args.to_vec(),
        }
    }
}

/// Operation applied to one key
#[derive(Debug, Clone)]
pub enum BatchOperation {
    /// Read bins or run read operations
    Read {
        /// Per-record policy; `None` uses the batch policy
        policy: Option<Arc<BatchReadPolicy>>,
        /// What to read
        bins: ReadBins,
    },
    /// Run operations, at least one of which writes
    Write {
        /// Per-record policy
        policy: Option<Arc<BatchWritePolicy>>,
        /// Operations in order
        ops: Arc<[Operation]>,
    },
    /// Delete the record
    Delete {
        /// Per-record policy
        policy: Option<Arc<BatchDeletePolicy>>,
    },
    /// Call a record UDF
    Udf {
        /// Per-record policy
        policy: Option<Arc<BatchUdfPolicy>>,
        /// Function to call
        call: Arc<UdfCall>,
    },
}

fn same_policy<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

impl BatchOperation {
    /// Whether the operation can modify the record
    pub fn is_write(&self) -> bool {
        !matches!(self, BatchOperation::Read { .. })
    }

    /// Whether sending the operation twice has the same effect as once
    pub fn is_idempotent(&self) -> bool {
        match self {
            BatchOperation::Read { .. } | BatchOperation::Delete { .. } => true,
            BatchOperation::Write { ops, .. } => !ops.iter().any(|op| {
                matches!(
                    op.op_type,
                    OperationType::Add
                        | OperationType::Append
                        | OperationType::Prepend
                        | OperationType::CdtModify
                )
            }),
            BatchOperation::Udf { .. } => false,
        }
    }

    /// Whether a repeated bin name comes back as a list of values
    pub fn merges_lists(&self) -> bool {
        matches!(
            self,
            BatchOperation::Read {
                bins: ReadBins::Ops(_),
                ..
            } | BatchOperation::Write { .. }
        )
    }

    /// Reference equality: same variant pointing at the same policy and
    /// operation objects.
    pub fn same_as(&self, other: &BatchOperation) -> bool {
        match (self, other) {
            (
                BatchOperation::Read { policy: pa, bins: ba },
                BatchOperation::Read { policy: pb, bins: bb },
            ) => same_policy(pa, pb) && ba.same_as(bb),
            (
                BatchOperation::Write { policy: pa, ops: oa },
                BatchOperation::Write { policy: pb, ops: ob },
            ) => same_policy(pa, pb) && Arc::ptr_eq(oa, ob),
            (BatchOperation::Delete { policy: pa }, BatchOperation::Delete { policy: pb }) => {
                same_policy(pa, pb)
            }
            (
                BatchOperation::Udf { policy: pa, call: ca },
                BatchOperation::Udf { policy: pb, call: cb },
            ) => same_policy(pa, pb) && Arc::ptr_eq(ca, cb),
            _ => false,
        }
    }
}

/// One key of a batch call and its outcome
#[derive(Debug, Clone)]
pub struct BatchRecord {
    /// Key
    pub key: Key,
    /// Operation
    pub op: BatchOperation,
    /// Record returned on success
    pub record: Option<Record>,
    /// Outcome; `NO_RESPONSE` until an answer arrives
    pub result_code: ResultCode,
    /// The write may have been applied even though no answer arrived
    pub in_doubt: bool,
    /// The operation modifies the record
    pub has_write: bool,
    /// Failure text: the UDF failure message or the node error
    pub message: Option<String>,
}

impl BatchRecord {
    /// Record for `op` on `key`
    pub fn new(key: Key, op: BatchOperation) -> Self {
        let has_write = op.is_write();
        BatchRecord {
            key,
            op,
            record: None,
            result_code: ResultCode::NO_RESPONSE,
            in_doubt: false,
            has_write,
            message: None,
        }
    }

    /// Read with the batch policy
    pub fn read(key: Key, bins: ReadBins) -> Self {
        BatchRecord::new(key, BatchOperation::Read { policy: None, bins })
    }

    /// Read with its own policy
    pub fn read_with(key: Key, policy: Arc<BatchReadPolicy>, bins: ReadBins) -> Self {
        BatchRecord::new(
            key,
            BatchOperation::Read {
                policy: Some(policy),
                bins,
            },
        )
    }

    /// Operate with the default write policy
    pub fn write(key: Key, ops: Arc<[Operation]>) -> Self {
        BatchRecord::new(key, BatchOperation::Write { policy: None, ops })
    }

    /// Operate with its own policy
    pub fn write_with(key: Key, policy: Arc<BatchWritePolicy>, ops: Arc<[Operation]>) -> Self {
        BatchRecord::new(
            key,
            BatchOperation::Write {
                policy: Some(policy),
                ops,
            },
        )
    }

    /// Delete
    pub fn delete(key: Key, policy: Option<Arc<BatchDeletePolicy>>) -> Self {
        BatchRecord::new(key, BatchOperation::Delete { policy })
    }

    /// UDF call
    pub fn udf(key: Key, policy: Option<Arc<BatchUdfPolicy>>, call: Arc<UdfCall>) -> Self {
        BatchRecord::new(key, BatchOperation::Udf { policy, call })
    }

    /// Whether the key succeeded
    pub fn is_ok(&self) -> bool {
        self.result_code.is_ok()
    }

    pub(crate) fn set_outcome(&mut self, code: ResultCode, record: Option<Record>, message: Option<String>) {
        self.result_code = code;
        self.record = record;
        self.message = message;
        self.in_doubt = false;
    }

    pub(crate) fn set_error(&mut self, error: &Error) {
        self.result_code = error.result_code();
        self.record = None;
        self.in_doubt = self.has_write && error.in_doubt();
        self.message = Some(error.to_string());
    }
}

/// Records of a record variant call
#[derive(Debug, Clone)]
pub struct BatchResults {
    /// Records in caller order, outcomes filled in
    pub records: Vec<BatchRecord>,
    /// False when any record did not succeed
    pub status: bool,
}

impl BatchResults {
    pub(crate) fn new(records: Vec<BatchRecord>) -> Self {
        let status = records.iter().all(BatchRecord::is_ok);
        BatchResults { records, status }
    }

    /// Records that did not succeed
    pub fn failed(&self) -> impl Iterator<Item = &BatchRecord> {
        self.records.iter().filter(|r| !r.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::Bin;

    fn key(i: i64) -> Key {
        Key::new("test", "s", i).unwrap()
    }

    #[test]
    fn test_same_as_uses_identity() {
        let ops: Arc<[Operation]> = vec![Operation::put(Bin::new("a", 1i64))].into();
        let a = BatchRecord::write(key(1), Arc::clone(&ops));
        let b = BatchRecord::write(key(2), Arc::clone(&ops));
        assert!(a.op.same_as(&b.op));

        let copy: Arc<[Operation]> = ops.to_vec().into();
        let c = BatchRecord::write(key(3), copy);
        assert!(!a.op.same_as(&c.op));
    }

    #[test]
    fn test_same_as_policies() {
        let policy = Arc::new(BatchDeletePolicy::default());
        let a = BatchRecord::delete(key(1), Some(Arc::clone(&policy)));
        let b = BatchRecord::delete(key(2), Some(policy));
        let c = BatchRecord::delete(key(3), Some(Arc::new(BatchDeletePolicy::default())));
        let d = BatchRecord::delete(key(4), None);
        assert!(a.op.same_as(&b.op));
        assert!(!a.op.same_as(&c.op));
        assert!(!a.op.same_as(&d.op));
        assert!(d.op.same_as(&BatchRecord::delete(key(5), None).op));
    }

    #[test]
    fn test_read_all_repeats_without_shared_objects() {
        let a = BatchRecord::read(key(1), ReadBins::All);
        let b = BatchRecord::read(key(2), ReadBins::All);
        let h = BatchRecord::read(key(3), ReadBins::Header);
        assert!(a.op.same_as(&b.op));
        assert!(!a.op.same_as(&h.op));
    }

    #[test]
    fn test_idempotence() {
        let add: Arc<[Operation]> = vec![Operation::add(Bin::new("n", 1i64))].into();
        assert!(!BatchRecord::write(key(1), add).op.is_idempotent());
        let put: Arc<[Operation]> = vec![Operation::put(Bin::new("n", 1i64))].into();
        assert!(BatchRecord::write(key(1), put).op.is_idempotent());
        let call = Arc::new(UdfCall::new("pkg", "f", &[]));
        assert!(!BatchRecord::udf(key(1), None, call).op.is_idempotent());
    }

    #[test]
    fn test_error_sets_in_doubt_for_writes_only() {
        let err = Error::Timeout {
            node: Some("A".into()),
            client: false,
            iterations: 1,
            in_doubt: true,
        };
        let mut w = BatchRecord::delete(key(1), None);
        w.set_error(&err);
        assert!(w.in_doubt);
        assert_eq!(w.result_code, ResultCode::TIMEOUT);

        let mut r = BatchRecord::read(key(2), ReadBins::All);
        r.set_error(&err);
        assert!(!r.in_doubt);
    }

    #[test]
    fn test_results_status() {
        let mut a = BatchRecord::read(key(1), ReadBins::All);
        a.set_outcome(ResultCode::OK, Some(Record::default()), None);
        let mut b = BatchRecord::read(key(2), ReadBins::All);
        b.set_outcome(ResultCode::KEY_NOT_FOUND, None, None);
        let results = BatchResults::new(vec![a.clone(), b]);
        assert!(!results.status);
        assert_eq!(results.failed().count(), 1);
        assert!(BatchResults::new(vec![a]).status);
    }
}
