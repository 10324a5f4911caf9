//! The command contract
//!
//! A command is a single-use execution context: it owns its key (or keys),
//! a copy of the caller's policy and its routing state. The [`Executor`]
//! drives any command through the same attempt loop and only ever sees it
//! as `&mut dyn Command`.
//!
//! [`Executor`]: crate::Executor

use crate::engine::Executor;
use crate::reader::ResponseReader;
use meridian_cluster::{Cluster, Node};
use meridian_core::{BasePolicy, Key, Result};
use std::sync::Arc;

/// One operation kind, executed by the retry engine.
pub trait Command {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Timeouts, retry budget and transaction of this call
    fn policy(&self) -> &BasePolicy;

    /// Whether the command modifies records; a failed write may be in doubt
    fn is_write(&self) -> bool;

    /// Whether re-sending the request after it was fully written is safe
    fn is_idempotent(&self) -> bool {
        true
    }

    /// Whether the response is a stream of messages ending with `LAST`
    fn is_multi(&self) -> bool {
        false
    }

    /// Connection pool hint
    fn affinity(&self) -> u32 {
        0
    }

    /// Node for the next attempt
    fn select_node(&mut self, cluster: &dyn Cluster) -> Result<Arc<dyn Node>>;

    /// Encode the request frame. Called once per execution.
    fn build_request(&mut self) -> Result<Vec<u8>>;

    /// Read and apply the response
    fn parse_response(&mut self, reader: &mut ResponseReader<'_>) -> Result<()>;

    /// Prepare the next attempt after a failure.
    ///
    /// `is_timeout` is true when no answer arrived within the socket timeout.
    /// Returning false means the command cannot retry in place; the engine
    /// then offers [`Command::retry_split`].
    fn prepare_retry(&mut self, is_timeout: bool) -> bool;

    /// Finish the remaining work through other commands.
    ///
    /// Returns `None` when the command has no alternative route, in which
    /// case the last error is surfaced.
    fn retry_split(&mut self, _executor: &Executor) -> Option<Result<()>> {
        None
    }

    /// Called once when the final error leaves a write in doubt
    fn on_in_doubt(&mut self) {}
}

/// Connection pool hint for a key
pub fn key_affinity(key: &Key) -> u32 {
    let d = key.digest().as_bytes();
    u32::from_le_bytes([d[0], d[1], d[2], d[3]])
}
