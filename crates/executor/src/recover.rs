//! Salvaging timed-out connections
//!
//! A socket timeout usually means the server is slow, not gone. Rather than
//! closing the connection and paying for a new one, a background thread
//! keeps reading the rest of the response for up to `timeout_delay`. If the
//! stream reaches a clean end the connection goes back to the pool.

use crate::reader::{contains_last, ReadState, ResponseReader};
use meridian_cluster::{Connection, Node};
use meridian_core::{Error, Result};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Drains a timed-out response in the background
pub struct ConnectionRecover {
    node: Arc<dyn Node>,
    conn: Box<dyn Connection>,
    state: ReadState,
    delay: Duration,
}

impl ConnectionRecover {
    /// Recover `conn` from `state` within `delay`
    pub fn new(
        node: Arc<dyn Node>,
        conn: Box<dyn Connection>,
        state: ReadState,
        delay: Duration,
    ) -> Self {
        ConnectionRecover {
            node,
            conn,
            state,
            delay,
        }
    }

    /// Start the drain thread. The caller does not wait for it.
    pub fn spawn(self) {
        let node = Arc::clone(&self.node);
        let spawned = thread::Builder::new()
            .name("meridian-recover".into())
            .spawn(move || self.run());
        if let Err(e) = spawned {
            // The closure (and with it the connection) was dropped unrun.
            warn!(
                target: "meridian::command",
                node = node.name(),
                error = %e,
                "could not start connection recovery"
            );
        }
    }

    /// Drain on the current thread
    pub fn run(self) {
        let ConnectionRecover {
            node,
            mut conn,
            state,
            delay,
        } = self;
        let start = Instant::now();
        match drain(conn.as_mut(), state, delay) {
            Ok(()) => {
                debug!(
                    target: "meridian::command",
                    node = node.name(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "recovered connection"
                );
                node.put_connection(conn);
            }
            Err(e) => {
                warn!(
                    target: "meridian::command",
                    node = node.name(),
                    error = %e,
                    "connection recovery failed, closing"
                );
                node.close_connection(conn);
            }
        }
    }
}

fn drain(conn: &mut dyn Connection, state: ReadState, delay: Duration) -> Result<()> {
    let deadline = Instant::now() + delay;
    let multi = state.is_multi();
    let mut reader = ResponseReader::resume(conn, state);
    loop {
        if reader.state().is_complete() {
            return Ok(());
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::socket_timeout());
        }
        reader.set_timeout(Some(remaining))?;
        let body = reader.read_frame()?;
        if multi && contains_last(&body)? {
            reader.mark_last();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_cluster::testing::{MockNode, Reply};
    use meridian_proto::{frame, info3, MessageBuilder};
    use std::io::Write;

    fn single_frame() -> Vec<u8> {
        frame(&MessageBuilder::new().finish_message())
    }

    fn timed_out_state(reply: Vec<u8>, head: usize, multi: bool) -> (Box<dyn Connection>, ReadState) {
        let responder = MockNode::new("R", move |_| Reply::Stall {
            head,
            bytes: reply.clone(),
        });
        let mut conn = responder.get_connection(Duration::ZERO, 0).unwrap();
        conn.write_all(&frame(&[])).unwrap();
        let mut reader = ResponseReader::new(conn.as_mut(), multi);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        let state = reader.into_state();
        (conn, state)
    }

    #[test]
    fn test_drain_single_frame() {
        let (mut conn, state) = timed_out_state(single_frame(), 5, false);
        drain(conn.as_mut(), state, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_drain_multi_until_last() {
        let mut body = MessageBuilder::new().finish_message();
        let mut last = MessageBuilder::new();
        last.header.info3 = info3::LAST;
        body.extend_from_slice(&last.finish_message());
        let mut bytes = single_frame();
        bytes.extend_from_slice(&frame(&body));
        let (mut conn, state) = timed_out_state(bytes, 3, true);
        drain(conn.as_mut(), state, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_drain_fails_without_last() {
        let (mut conn, state) = timed_out_state(single_frame(), 3, true);
        // One frame arrives, then reads time out waiting for LAST.
        assert!(drain(conn.as_mut(), state, Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_run_returns_connection_to_pool() {
        let node = Arc::new(MockNode::silent("A"));
        let (conn, state) = timed_out_state(single_frame(), 5, false);
        ConnectionRecover::new(node.clone(), conn, state, Duration::from_secs(1)).run();
        assert_eq!(node.put_count(), 1);
        assert_eq!(node.close_count(), 0);
    }
}
