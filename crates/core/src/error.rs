//! Error types for Meridian
//!
//! One enum covers the four failure classes a command can end in:
//! - **transport**: `Timeout`, `Network`, `NoMoreConnections` (retryable,
//!   may leave a write in doubt)
//! - **protocol**: `Protocol` (never retried)
//! - **server-reported**: `Server` with a [`ResultCode`]
//! - **transaction**: `TxnClosed`, `TxnNamespace`, `TxnAlreadyCommitted`,
//!   `TxnAlreadyAborted`
//!
//! Commit and abort failures that carry per-key detail live in the
//! transaction crate and wrap this type.

use crate::result_code::ResultCode;
use crate::txn::TxnState;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for Meridian operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by commands, batches and transactions
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Total deadline or socket timeout expired
    #[error("{} timeout after {iterations} attempt(s){}{}", timeout_kind(.client), node_suffix(.node), doubt_suffix(.in_doubt))]
    Timeout {
        /// Node the last attempt targeted
        node: Option<String>,
        /// True when the client deadline fired, false for socket/server timeouts
        client: bool,
        /// Attempts made
        iterations: u32,
        /// The write may have been applied
        in_doubt: bool,
    },

    /// Socket failure (connect, reset, short read)
    #[error("network error{}: {source}{}", node_suffix(.node), doubt_suffix(.in_doubt))]
    Network {
        /// Node the connection belonged to
        node: Option<String>,
        /// Underlying I/O error
        #[source]
        source: Arc<io::Error>,
        /// The write may have been applied
        in_doubt: bool,
    },

    /// Malformed frame or size mismatch; the stream cannot be trusted
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Well-formed error response from the server
    #[error("server error{}: {code}{}{}", node_suffix(.node), message_suffix(.message), doubt_suffix(.in_doubt))]
    Server {
        /// Result code from the message header
        code: ResultCode,
        /// Node that answered
        node: Option<String>,
        /// The write may have been applied
        in_doubt: bool,
        /// Server-provided detail (UDF failure text)
        message: Option<String>,
    },

    /// No node can serve the request
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// Connection pool exhausted
    #[error("no more connections available for node {node}")]
    NoMoreConnections {
        /// Node whose pool was exhausted
        node: String,
    },

    /// Rejected before anything was sent
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Command issued on a transaction that is no longer open
    #[error("transaction {id} is closed (state: {state:?})")]
    TxnClosed {
        /// Transaction id
        id: u64,
        /// Current state
        state: TxnState,
    },

    /// Key namespace differs from the transaction's namespace
    #[error("transaction namespace mismatch: expected {expected}, got {actual}")]
    TxnNamespace {
        /// Namespace fixed by the first key
        expected: String,
        /// Namespace of the offending key
        actual: String,
    },

    /// Abort requested after commit
    #[error("transaction already committed")]
    TxnAlreadyCommitted,

    /// Commit requested after abort
    #[error("transaction already aborted")]
    TxnAlreadyAborted,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Record could not be mapped by the configured decoder
    #[error("decode error: {0}")]
    Decode(String),
}

fn timeout_kind(client: &bool) -> &'static str {
    if *client {
        "client"
    } else {
        "socket"
    }
}

fn node_suffix(node: &Option<String>) -> String {
    match node {
        Some(n) => format!(" (node {})", n),
        None => String::new(),
    }
}

fn doubt_suffix(in_doubt: &bool) -> &'static str {
    if *in_doubt {
        " [in doubt]"
    } else {
        ""
    }
}

fn message_suffix(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {}", m),
        None => String::new(),
    }
}

impl Error {
    /// Server error with no node or message attached.
    pub fn server(code: ResultCode) -> Self {
        Error::Server {
            code,
            node: None,
            in_doubt: false,
            message: None,
        }
    }

    /// Protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Network error from an I/O failure
    pub fn network(source: io::Error) -> Self {
        Error::Network {
            node: None,
            source: Arc::new(source),
            in_doubt: false,
        }
    }

    /// Socket timeout (not the client deadline)
    pub fn socket_timeout() -> Self {
        Error::Timeout {
            node: None,
            client: false,
            iterations: 0,
            in_doubt: false,
        }
    }

    /// Convert a socket I/O error, classifying timeouts separately.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::socket_timeout(),
            _ => Error::network(err),
        }
    }

    /// Result code equivalent of this error
    pub fn result_code(&self) -> ResultCode {
        match self {
            Error::Timeout { .. } => ResultCode::TIMEOUT,
            Error::Network { .. } => ResultCode::NETWORK_ERROR,
            Error::Protocol(_) => ResultCode::PARSE_ERROR,
            Error::Server { code, .. } => *code,
            Error::InvalidNode(_) => ResultCode::INVALID_NODE,
            Error::NoMoreConnections { .. } => ResultCode::NO_MORE_CONNECTIONS,
            Error::InvalidArgument(_) => ResultCode::INVALID_ARGUMENT,
            Error::TxnClosed { .. } | Error::TxnNamespace { .. } => ResultCode::TXN_FAILED,
            Error::TxnAlreadyCommitted => ResultCode::TXN_ALREADY_COMMITTED,
            Error::TxnAlreadyAborted => ResultCode::TXN_ALREADY_ABORTED,
            Error::Config(_) => ResultCode::CONFIG_ERROR,
            Error::Decode(_) => ResultCode::DECODE_ERROR,
        }
    }

    /// Whether the write this error belongs to may have been applied
    pub fn in_doubt(&self) -> bool {
        match self {
            Error::Timeout { in_doubt, .. }
            | Error::Network { in_doubt, .. }
            | Error::Server { in_doubt, .. } => *in_doubt,
            _ => false,
        }
    }

    /// True for transport failures (no well-formed response was parsed)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Network { .. } | Error::NoMoreConnections { .. }
        )
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout { client, .. } => !client,
            Error::Network { .. } | Error::NoMoreConnections { .. } => true,
            Error::Server { code, .. } => code.is_retryable(),
            _ => false,
        }
    }

    /// Mark a write error in doubt.
    ///
    /// A write is in doubt when its request was sent more than once, or sent
    /// exactly once and the failure left no answer (transport failure or a
    /// server timeout).
    pub fn mark_in_doubt(&mut self, is_write: bool, sent_count: u32) {
        if !is_write || sent_count == 0 {
            return;
        }
        let no_answer = self.is_transport() || self.result_code() == ResultCode::TIMEOUT;
        if sent_count > 1 || no_answer {
            match self {
                Error::Timeout { in_doubt, .. }
                | Error::Network { in_doubt, .. }
                | Error::Server { in_doubt, .. } => *in_doubt = true,
                _ => {}
            }
        }
    }

    /// Attach the node name, keeping an existing one.
    pub fn with_node(mut self, name: &str) -> Self {
        match &mut self {
            Error::Timeout { node, .. } | Error::Network { node, .. } | Error::Server { node, .. } => {
                if node.is_none() {
                    *node = Some(name.to_string());
                }
            }
            _ => {}
        }
        self
    }

    /// Record how many attempts were made (timeouts only).
    pub fn with_iterations(mut self, count: u32) -> Self {
        if let Error::Timeout { iterations, .. } = &mut self {
            *iterations = count;
        }
        self
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::from_io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout {
            node: Some("BB9".into()),
            client: true,
            iterations: 3,
            in_doubt: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("client timeout"));
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("BB9"));
        assert!(msg.contains("in doubt"));
    }

    #[test]
    fn test_error_display_server_message() {
        let err = Error::Server {
            code: ResultCode::UDF_BAD_RESPONSE,
            node: None,
            in_doubt: false,
            message: Some("bad arg".into()),
        };
        assert!(err.to_string().contains("bad arg"));
    }

    #[test]
    fn test_from_io_classifies_timeout() {
        let err = Error::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(err, Error::Timeout { client: false, .. }));
        let err = Error::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(err, Error::Network { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_mark_in_doubt_rules() {
        let mut e = Error::socket_timeout();
        e.mark_in_doubt(false, 1);
        assert!(!e.in_doubt());
        e.mark_in_doubt(true, 0);
        assert!(!e.in_doubt());
        e.mark_in_doubt(true, 1);
        assert!(e.in_doubt());

        // A definite server answer on the only send is not in doubt.
        let mut e = Error::server(ResultCode::GENERATION_ERROR);
        e.mark_in_doubt(true, 1);
        assert!(!e.in_doubt());
        // But it is once an earlier attempt may have landed.
        e.mark_in_doubt(true, 2);
        assert!(e.in_doubt());
    }

    #[test]
    fn test_protocol_errors_are_fatal() {
        let err = Error::protocol("short header");
        assert!(!err.is_retryable());
        assert_eq!(err.result_code(), ResultCode::PARSE_ERROR);
    }

    #[test]
    fn test_with_node_keeps_existing() {
        let err = Error::server(ResultCode::KEY_BUSY).with_node("A").with_node("B");
        match err {
            Error::Server { node, .. } => assert_eq!(node.as_deref(), Some("A")),
            _ => panic!("Wrong error variant"),
        }
    }
}
