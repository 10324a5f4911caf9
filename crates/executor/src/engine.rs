//! The attempt loop
//!
//! [`Executor::execute`] drives a [`Command`] until it succeeds, hits a fatal
//! error, runs out of retries or passes its deadline. Per attempt it selects
//! a node, borrows a connection, writes the request and hands a
//! [`ResponseReader`] to the command.
//!
//! Connections go back to the pool only when the response was fully
//! consumed. A socket timeout with a `timeout_delay` hands the connection to
//! a [`ConnectionRecover`] thread instead of closing it.

use crate::command::Command;
use crate::reader::{ReadState, ResponseReader};
use crate::recover::ConnectionRecover;
use meridian_cluster::{Cluster, Connection, Node};
use meridian_core::{BasePolicy, Error, Result, ResultCode};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Smallest socket timeout handed to a connection
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// Runs commands against a cluster
#[derive(Clone)]
pub struct Executor {
    cluster: Arc<dyn Cluster>,
}

/// Outcome of one failed attempt
struct Failure {
    error: Error,
    sent: bool,
}

impl Failure {
    fn unsent(error: Error) -> Self {
        Failure { error, sent: false }
    }
}

impl Executor {
    /// Executor over a cluster view
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Executor { cluster }
    }

    /// The cluster view
    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    /// Run `cmd` to completion.
    ///
    /// # Errors
    ///
    /// The last attempt's error, annotated with the node, the number of
    /// attempts and whether a write may have been applied.
    pub fn execute(&self, cmd: &mut dyn Command) -> Result<()> {
        let policy = cmd.policy().clone();
        let deadline = (!policy.total_timeout.is_zero()).then(|| Instant::now() + policy.total_timeout);
        let request = cmd.build_request()?;

        let mut iteration = 0u32;
        let mut sent_count = 0u32;
        let mut node_name: Option<String> = None;

        let error = loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break Error::Timeout {
                    node: None,
                    client: true,
                    iterations: iteration,
                    in_doubt: false,
                };
            }
            let timeout = socket_timeout(&policy, deadline);
            iteration += 1;

            let Failure { error, sent } =
                match self.attempt(cmd, &request, timeout, &policy, &mut node_name) {
                    Ok(()) => return Ok(()),
                    Err(f) => f,
                };
            if sent {
                sent_count += 1;
            }

            if !should_retry(&error, sent, cmd.is_idempotent()) || iteration > policy.max_retries {
                break error;
            }

            debug!(
                target: "meridian::command",
                command = cmd.name(),
                node = node_name.as_deref().unwrap_or("-"),
                iteration,
                error = %error,
                "attempt failed, retrying"
            );

            let mut delay = policy.retry_delay(iteration - 1);
            if let Some(d) = deadline {
                delay = delay.min(d.saturating_duration_since(Instant::now()));
            }
            if !delay.is_zero() {
                thread::sleep(delay);
            }

            if !cmd.prepare_retry(matches!(error, Error::Timeout { .. })) {
                if let Some(result) = cmd.retry_split(self) {
                    return result;
                }
                break error;
            }
        };

        Err(self.finish_error(cmd, error, node_name.as_deref(), iteration, sent_count))
    }

    fn attempt(
        &self,
        cmd: &mut dyn Command,
        request: &[u8],
        timeout: Option<Duration>,
        policy: &BasePolicy,
        node_name: &mut Option<String>,
    ) -> std::result::Result<(), Failure> {
        let node = cmd
            .select_node(self.cluster.as_ref())
            .map_err(Failure::unsent)?;
        *node_name = Some(node.name().to_string());

        let mut conn = node
            .get_connection(timeout.unwrap_or(Duration::ZERO), cmd.affinity())
            .map_err(Failure::unsent)?;
        if let Err(e) = conn.set_timeout(timeout) {
            node.close_connection(conn);
            return Err(Failure::unsent(Error::network(e)));
        }

        if let Err(e) = conn.write_all(request).and_then(|()| conn.flush()) {
            node.close_connection(conn);
            return Err(Failure::unsent(Error::network(e)));
        }

        let mut reader = ResponseReader::new(conn.as_mut(), cmd.is_multi());
        let result = cmd.parse_response(&mut reader);
        let state = reader.into_state();

        match result {
            Ok(()) => {
                release(&node, conn, &state);
                Ok(())
            }
            Err(error) => {
                if matches!(error, Error::Timeout { .. }) && !policy.timeout_delay.is_zero() {
                    ConnectionRecover::new(node, conn, state, policy.timeout_delay).spawn();
                } else {
                    release(&node, conn, &state);
                }
                Err(Failure { error, sent: true })
            }
        }
    }

    fn finish_error(
        &self,
        cmd: &mut dyn Command,
        error: Error,
        node: Option<&str>,
        iterations: u32,
        sent_count: u32,
    ) -> Error {
        let mut error = match node {
            Some(name) => error.with_node(name),
            None => error,
        };
        error = error.with_iterations(iterations);
        error.mark_in_doubt(cmd.is_write(), sent_count);

        let protocol_after_send =
            cmd.is_write() && sent_count > 0 && matches!(error, Error::Protocol(_));
        if error.in_doubt() || protocol_after_send {
            cmd.on_in_doubt();
        }
        debug!(
            target: "meridian::command",
            command = cmd.name(),
            iterations,
            error = %error,
            "command failed"
        );
        error
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("nodes", &self.cluster.nodes().len())
            .finish()
    }
}

/// Pool the connection when the response was consumed, otherwise close it
fn release(node: &Arc<dyn Node>, conn: Box<dyn Connection>, state: &ReadState) {
    if state.is_complete() {
        node.put_connection(conn);
    } else {
        node.close_connection(conn);
    }
}

/// Socket timeout for the next attempt: the policy's socket timeout clamped
/// to the remaining total budget.
fn socket_timeout(policy: &BasePolicy, deadline: Option<Instant>) -> Option<Duration> {
    let remaining = deadline.map(|d| {
        d.saturating_duration_since(Instant::now())
            .max(MIN_SOCKET_TIMEOUT)
    });
    match (policy.socket_timeout.is_zero(), remaining) {
        (true, remaining) => remaining,
        (false, None) => Some(policy.socket_timeout),
        (false, Some(r)) => Some(policy.socket_timeout.min(r)),
    }
}

/// Whether another attempt is allowed after `error`.
///
/// A missing node is retried so the next attempt can pick another replica.
/// A non-idempotent request that was fully sent is retried only when the
/// server answered definitively.
fn should_retry(error: &Error, sent: bool, idempotent: bool) -> bool {
    let retryable = error.is_retryable() || matches!(error, Error::InvalidNode(_));
    if !retryable {
        return false;
    }
    let no_answer = error.is_transport() || error.result_code() == ResultCode::TIMEOUT;
    idempotent || !sent || !no_answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_socket_timeout_clamped_to_deadline() {
        let policy = BasePolicy {
            socket_timeout: Duration::from_secs(30),
            ..BasePolicy::default()
        };
        let deadline = Instant::now() + Duration::from_millis(200);
        let t = socket_timeout(&policy, Some(deadline)).unwrap();
        assert!(t <= Duration::from_millis(200));

        assert_eq!(socket_timeout(&policy, None), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_socket_timeout_zero_means_remaining() {
        let policy = BasePolicy {
            socket_timeout: Duration::ZERO,
            ..BasePolicy::default()
        };
        assert_eq!(socket_timeout(&policy, None), None);
        let deadline = Instant::now() + Duration::from_secs(5);
        let t = socket_timeout(&policy, Some(deadline)).unwrap();
        assert!(t > Duration::from_secs(4));
    }

    #[test]
    fn test_should_retry_rules() {
        let timeout = Error::socket_timeout();
        assert!(should_retry(&timeout, true, true));
        assert!(should_retry(&timeout, false, false));
        assert!(!should_retry(&timeout, true, false));

        let busy = Error::server(ResultCode::KEY_BUSY);
        assert!(should_retry(&busy, true, false));

        let server_timeout = Error::server(ResultCode::TIMEOUT);
        assert!(!should_retry(&server_timeout, true, false));

        let reset = Error::network(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(should_retry(&reset, true, true));

        assert!(!should_retry(&Error::protocol("bad"), true, true));
        assert!(!should_retry(&Error::server(ResultCode::GENERATION_ERROR), true, true));
        assert!(should_retry(&Error::InvalidNode("none".into()), false, true));
    }
}
