//! Commit and abort
//!
//! ```text
//! commit:  Open ──verify──► Verified ──mark monitor──► Committed ──roll forward──► close
//!            │ verify failed
//!            └──► Aborted ──roll back──► close ──► CommitError
//! abort:   Open | Verified ──► Aborted ──roll back──► close
//! ```
//!
//! The state moves before the pass that depends on it runs, so a command
//! racing with commit or abort is rejected as soon as the decision is made.
//! Once the monitor is marked for roll-forward the commit is durable: later
//! failures are reported as abandoned cleanup, not as errors. The outcome
//! carries the roll records so keys left in doubt stay visible.

use crate::error::{
    AbortOutcome, AbortStatus, CommitError, CommitErrorKind, CommitOutcome, CommitStatus, Result,
};
use meridian_batch::{txn_roll, txn_verify, BatchRecord};
use meridian_core::{BatchPolicy, Error, ResultCode, Txn, TxnState};
use meridian_executor::commands::monitor;
use meridian_executor::Executor;
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether a verify record passed
pub(crate) fn verified(record: &BatchRecord) -> bool {
    matches!(record.result_code, ResultCode::OK | ResultCode::KEY_NOT_FOUND)
}

fn record_error(record: &BatchRecord) -> Error {
    Error::Server {
        code: record.result_code,
        node: None,
        in_doubt: record.in_doubt,
        message: record.message.clone(),
    }
}

/// Commit `txn`.
///
/// On an open transaction this verifies the read-set, marks the monitor for
/// roll-forward and rolls the write-set forward. A verified transaction
/// resumes at the monitor mark. The outcome holds the verify and
/// roll-forward records.
///
/// # Errors
///
/// [`TxnError::Commit`](crate::TxnError::Commit) when verify fails (the
/// transaction is rolled back) or the monitor cannot be marked, and
/// `TxnAlreadyAborted` on an aborted transaction.
pub fn commit(
    exec: &Executor,
    verify_policy: &BatchPolicy,
    roll_policy: &BatchPolicy,
    txn: &Arc<Txn>,
) -> Result<CommitOutcome> {
    match txn.state() {
        TxnState::Open => {
            let verify_records = verify(exec, verify_policy, roll_policy, txn)?;
            Ok(commit_verified(exec, roll_policy, txn, verify_records)?)
        }
        TxnState::Verified => Ok(commit_verified(exec, roll_policy, txn, Vec::new())?),
        TxnState::Committed => Ok(CommitOutcome::new(CommitStatus::AlreadyCommitted)),
        TxnState::Aborted => Err(Error::TxnAlreadyAborted.into()),
    }
}

/// Abort `txn` and roll its writes back. The outcome holds the roll-back
/// records.
///
/// # Errors
///
/// `TxnAlreadyCommitted` on a committed transaction.
pub fn abort(exec: &Executor, roll_policy: &BatchPolicy, txn: &Arc<Txn>) -> meridian_core::Result<AbortOutcome> {
    match txn.state() {
        TxnState::Open | TxnState::Verified => {
            txn.set_state(TxnState::Aborted);
            debug!(target: "meridian::txn", txn = txn.id(), writes = txn.write_count(), "aborting");
            let (roll_records, failure) = roll(exec, roll_policy, txn, false);
            let mut outcome = AbortOutcome {
                status: AbortStatus::Ok,
                roll_records,
            };
            if let Some(e) = failure {
                warn!(target: "meridian::txn", txn = txn.id(), error = %e, "roll back abandoned");
                outcome.status = AbortStatus::RollBackAbandoned;
            } else if let Err(e) = close(exec, roll_policy, txn) {
                warn!(target: "meridian::txn", txn = txn.id(), error = %e, "monitor close abandoned");
                outcome.status = AbortStatus::CloseAbandoned;
            }
            Ok(outcome)
        }
        TxnState::Committed => Err(Error::TxnAlreadyCommitted),
        TxnState::Aborted => Ok(AbortOutcome::new(AbortStatus::AlreadyAborted)),
    }
}

// ============================================================================
// Passes
// ============================================================================

/// Verify the read-set. On failure the transaction is aborted and rolled
/// back before the error is returned.
fn verify(
    exec: &Executor,
    verify_policy: &BatchPolicy,
    roll_policy: &BatchPolicy,
    txn: &Arc<Txn>,
) -> std::result::Result<Vec<BatchRecord>, CommitError> {
    let (records, cause) = if txn.read_count() == 0 {
        (Vec::new(), None)
    } else {
        match txn_verify(exec, verify_policy, txn) {
            Ok(results) => {
                let cause = results.records.iter().find(|r| !verified(r)).map(record_error);
                (results.records, cause)
            }
            Err(e) => (Vec::new(), Some(e)),
        }
    };

    let Some(cause) = cause else {
        txn.set_state(TxnState::Verified);
        debug!(target: "meridian::txn", txn = txn.id(), reads = records.len(), "verified");
        return Ok(records);
    };

    warn!(target: "meridian::txn", txn = txn.id(), error = %cause, "verify failed, rolling back");
    txn.set_state(TxnState::Aborted);
    let (roll_records, roll_failure) = roll(exec, roll_policy, txn, false);
    if roll_failure.is_some() {
        return Err(CommitError::new(CommitErrorKind::VerifyFailAbortAbandoned, records, cause)
            .with_roll_records(roll_records));
    }
    if close(exec, roll_policy, txn).is_err() {
        return Err(CommitError::new(CommitErrorKind::VerifyFailCloseAbandoned, records, cause)
            .with_roll_records(roll_records));
    }
    Err(CommitError::new(CommitErrorKind::VerifyFail, records, cause).with_roll_records(roll_records))
}

fn commit_verified(
    exec: &Executor,
    roll_policy: &BatchPolicy,
    txn: &Arc<Txn>,
    verify_records: Vec<BatchRecord>,
) -> std::result::Result<CommitOutcome, CommitError> {
    if txn.monitor_exists() {
        if let Err(e) = monitor::mark_roll_forward(exec, &roll_policy.base, txn) {
            warn!(target: "meridian::txn", txn = txn.id(), error = %e, "mark roll forward failed");
            let aborted = e.result_code() == ResultCode::MRT_ABORTED;
            let mut err = CommitError::new(CommitErrorKind::MarkRollForwardAbandoned, verify_records, e);
            if aborted {
                txn.set_in_doubt(false);
                txn.set_state(TxnState::Aborted);
            } else if txn.in_doubt() || err.source.in_doubt() {
                err.in_doubt = true;
                txn.set_in_doubt(true);
            }
            return Err(err);
        }
    }

    txn.set_state(TxnState::Committed);
    txn.set_in_doubt(false);
    debug!(target: "meridian::txn", txn = txn.id(), writes = txn.write_count(), "committed");

    let (roll_records, failure) = roll(exec, roll_policy, txn, true);
    let mut outcome = CommitOutcome {
        status: CommitStatus::Ok,
        verify_records,
        roll_records,
    };
    if let Some(e) = failure {
        warn!(target: "meridian::txn", txn = txn.id(), error = %e, "roll forward abandoned");
        outcome.status = CommitStatus::RollForwardAbandoned;
    } else if let Err(e) = close(exec, roll_policy, txn) {
        warn!(target: "meridian::txn", txn = txn.id(), error = %e, "monitor close abandoned");
        outcome.status = CommitStatus::CloseAbandoned;
    }
    Ok(outcome)
}

/// Roll the write-set. Returns the records and the first failure, if any.
fn roll(exec: &Executor, policy: &BatchPolicy, txn: &Arc<Txn>, forward: bool) -> (Vec<BatchRecord>, Option<Error>) {
    if txn.write_count() == 0 {
        return (Vec::new(), None);
    }
    // Node failures land on the records instead of failing the call.
    let policy = BatchPolicy {
        allow_partial_results: true,
        ..policy.clone()
    };
    match txn_roll(exec, &policy, txn, forward) {
        Ok(results) => {
            let failure = results.failed().next().map(record_error);
            (results.records, failure)
        }
        Err(e) => (Vec::new(), Some(e)),
    }
}

/// Delete the monitor unless a write was left in doubt, then forget the keys.
fn close(exec: &Executor, policy: &BatchPolicy, txn: &Arc<Txn>) -> meridian_core::Result<()> {
    if txn.close_monitor() {
        monitor::close(exec, &policy.base, txn)?;
        debug!(target: "meridian::txn", txn = txn.id(), "monitor closed");
    } else if txn.monitor_might_exist() {
        debug!(target: "meridian::txn", txn = txn.id(), "monitor left for server expiry");
    }
    if !txn.write_in_doubt() {
        txn.clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verified_accepts_not_found() {
        let key = meridian_core::Key::new("test", "s", 1i64).unwrap();
        let mut r = BatchRecord::read(key, meridian_batch::ReadBins::Header);
        assert!(!verified(&r));
        r.result_code = ResultCode::KEY_NOT_FOUND;
        assert!(verified(&r));
        r.result_code = ResultCode::MRT_VERSION_MISMATCH;
        assert!(!verified(&r));
        assert_eq!(record_error(&r).result_code(), ResultCode::MRT_VERSION_MISMATCH);
    }
}
