//! Commit and abort outcomes

use meridian_batch::BatchRecord;
use meridian_core::Error;
use std::fmt;
use thiserror::Error;

/// Commit finished; the non-`Ok` values report cleanup that was left to the
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// Committed, rolled forward and closed
    Ok,
    /// The transaction was committed earlier
    AlreadyCommitted,
    /// Committed, but rolling the writes forward failed. The server finishes
    /// the roll from the monitor record.
    RollForwardAbandoned,
    /// Committed and rolled forward, but the monitor record was not deleted
    CloseAbandoned,
}

/// Abort finished; the non-`Ok` values report cleanup that was left to the
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortStatus {
    /// Rolled back and closed
    Ok,
    /// The transaction was aborted earlier
    AlreadyAborted,
    /// Aborted, but rolling the writes back failed
    RollBackAbandoned,
    /// Aborted and rolled back, but the monitor record was not deleted
    CloseAbandoned,
}

/// Finished commit with the per-key records of each pass that ran
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// How far the commit got
    pub status: CommitStatus,
    /// Verify records; empty when the read-set was empty or verified earlier
    pub verify_records: Vec<BatchRecord>,
    /// Roll-forward records; empty when no roll ran
    pub roll_records: Vec<BatchRecord>,
}

impl CommitOutcome {
    pub(crate) fn new(status: CommitStatus) -> Self {
        CommitOutcome {
            status,
            verify_records: Vec::new(),
            roll_records: Vec::new(),
        }
    }

    /// Roll records that did not succeed
    pub fn failed_rolls(&self) -> impl Iterator<Item = &BatchRecord> {
        self.roll_records.iter().filter(|r| !r.is_ok())
    }

    /// Roll records whose write may or may not have been applied
    pub fn in_doubt(&self) -> impl Iterator<Item = &BatchRecord> {
        self.roll_records.iter().filter(|r| r.in_doubt)
    }
}

/// Finished abort with the roll-back records
#[derive(Debug, Clone)]
pub struct AbortOutcome {
    /// How far the abort got
    pub status: AbortStatus,
    /// Roll-back records; empty when no roll ran
    pub roll_records: Vec<BatchRecord>,
}

impl AbortOutcome {
    pub(crate) fn new(status: AbortStatus) -> Self {
        AbortOutcome {
            status,
            roll_records: Vec::new(),
        }
    }

    /// Roll records that did not succeed
    pub fn failed_rolls(&self) -> impl Iterator<Item = &BatchRecord> {
        self.roll_records.iter().filter(|r| !r.is_ok())
    }

    /// Roll records whose write may or may not have been applied
    pub fn in_doubt(&self) -> impl Iterator<Item = &BatchRecord> {
        self.roll_records.iter().filter(|r| r.in_doubt)
    }
}

/// How a commit failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitErrorKind {
    /// Verify failed; the transaction was rolled back and closed
    VerifyFail,
    /// Verify failed and was rolled back, but the monitor was not deleted
    VerifyFailCloseAbandoned,
    /// Verify failed and the roll-back failed too
    VerifyFailAbortAbandoned,
    /// The monitor could not be marked for roll-forward; the outcome is
    /// decided by the server
    MarkRollForwardAbandoned,
}

impl fmt::Display for CommitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitErrorKind::VerifyFail => "transaction verify failed, transaction aborted",
            CommitErrorKind::VerifyFailCloseAbandoned => {
                "transaction verify failed, transaction aborted, monitor close abandoned"
            }
            CommitErrorKind::VerifyFailAbortAbandoned => {
                "transaction verify failed, transaction abort abandoned"
            }
            CommitErrorKind::MarkRollForwardAbandoned => {
                "transaction mark roll forward abandoned"
            }
        };
        f.write_str(s)
    }
}

/// Failed commit with the per-key records of each pass that ran
#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct CommitError {
    /// What failed
    pub kind: CommitErrorKind,
    /// Verify records; empty when verify did not run or did not answer
    pub verify_records: Vec<BatchRecord>,
    /// Roll-back records; empty when no roll ran
    pub roll_records: Vec<BatchRecord>,
    /// The commit may still take effect
    pub in_doubt: bool,
    /// Error that stopped the commit
    #[source]
    pub source: Error,
}

impl CommitError {
    pub(crate) fn new(kind: CommitErrorKind, verify_records: Vec<BatchRecord>, source: Error) -> Self {
        CommitError {
            kind,
            verify_records,
            roll_records: Vec::new(),
            in_doubt: false,
            source,
        }
    }

    pub(crate) fn with_roll_records(mut self, records: Vec<BatchRecord>) -> Self {
        self.roll_records = records;
        self
    }

    /// Verify records that did not pass
    pub fn failed_verifies(&self) -> impl Iterator<Item = &BatchRecord> {
        self.verify_records.iter().filter(|r| !crate::roll::verified(r))
    }
}

/// Error returned by commit
#[derive(Debug, Error)]
pub enum TxnError {
    /// Rejected before any pass ran
    #[error(transparent)]
    Client(#[from] Error),

    /// A pass failed
    #[error(transparent)]
    Commit(Box<CommitError>),
}

impl From<CommitError> for TxnError {
    fn from(e: CommitError) -> Self {
        TxnError::Commit(Box::new(e))
    }
}

impl TxnError {
    /// The commit failure, if a pass failed
    pub fn commit_error(&self) -> Option<&CommitError> {
        match self {
            TxnError::Commit(e) => Some(e),
            TxnError::Client(_) => None,
        }
    }
}

/// Result type alias for commit
pub type Result<T> = std::result::Result<T, TxnError>;
