//! Server and client result codes
//!
//! Non-negative codes come from the server's message header. Negative codes
//! are produced on the client side and never appear on the wire.

use std::fmt;

/// Outcome code of one command or one batch entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResultCode(pub i32);

impl ResultCode {
    // ==================== Client-side ====================
    /// Transaction roll-back or roll-forward failed
    pub const TXN_FAILED: ResultCode = ResultCode(-17);
    /// Transaction was already committed
    pub const TXN_ALREADY_COMMITTED: ResultCode = ResultCode(-18);
    /// Transaction was already aborted
    pub const TXN_ALREADY_ABORTED: ResultCode = ResultCode(-19);
    /// One or more keys of a batch failed
    pub const BATCH_FAILED: ResultCode = ResultCode(-16);
    /// No response was received for the command
    pub const NO_RESPONSE: ResultCode = ResultCode(-15);
    /// Invalid client configuration
    pub const CONFIG_ERROR: ResultCode = ResultCode(-9);
    /// Pool could not supply a connection
    pub const NO_MORE_CONNECTIONS: ResultCode = ResultCode(-7);
    /// Record decoding failed
    pub const DECODE_ERROR: ResultCode = ResultCode(-6);
    /// Argument rejected before sending
    pub const INVALID_ARGUMENT: ResultCode = ResultCode(-5);
    /// Socket-level failure
    pub const NETWORK_ERROR: ResultCode = ResultCode(-4);
    /// No node could serve the partition
    pub const INVALID_NODE: ResultCode = ResultCode(-3);
    /// Response stream could not be parsed
    pub const PARSE_ERROR: ResultCode = ResultCode(-2);
    /// Generic client failure
    pub const CLIENT_ERROR: ResultCode = ResultCode(-1);

    // ==================== Server ====================
    /// Success
    pub const OK: ResultCode = ResultCode(0);
    /// Unclassified server failure
    pub const SERVER_ERROR: ResultCode = ResultCode(1);
    /// Record does not exist
    pub const KEY_NOT_FOUND: ResultCode = ResultCode(2);
    /// Generation check failed
    pub const GENERATION_ERROR: ResultCode = ResultCode(3);
    /// Bad request parameter
    pub const PARAMETER_ERROR: ResultCode = ResultCode(4);
    /// Record already exists (create-only)
    pub const KEY_EXISTS: ResultCode = ResultCode(5);
    /// Bin already exists
    pub const BIN_EXISTS: ResultCode = ResultCode(6);
    /// Partition map changed under the request
    pub const CLUSTER_KEY_MISMATCH: ResultCode = ResultCode(7);
    /// Server out of memory
    pub const SERVER_MEM_ERROR: ResultCode = ResultCode(8);
    /// Timeout (server side, or client side when raised by the engine)
    pub const TIMEOUT: ResultCode = ResultCode(9);
    /// Operation forbidden by namespace configuration
    pub const ALWAYS_FORBIDDEN: ResultCode = ResultCode(10);
    /// Partition not available
    pub const PARTITION_UNAVAILABLE: ResultCode = ResultCode(11);
    /// Bin type does not support the operation
    pub const BIN_TYPE_ERROR: ResultCode = ResultCode(12);
    /// Record too big
    pub const RECORD_TOO_BIG: ResultCode = ResultCode(13);
    /// Too many concurrent operations on the record
    pub const KEY_BUSY: ResultCode = ResultCode(14);
    /// Feature not supported by the server
    pub const UNSUPPORTED_FEATURE: ResultCode = ResultCode(16);
    /// Bin not found
    pub const BIN_NOT_FOUND: ResultCode = ResultCode(17);
    /// Device cannot keep up with writes
    pub const DEVICE_OVERLOAD: ResultCode = ResultCode(18);
    /// Stored key does not match the sent key
    pub const KEY_MISMATCH: ResultCode = ResultCode(19);
    /// Namespace not found
    pub const INVALID_NAMESPACE: ResultCode = ResultCode(20);
    /// Bin name too long
    pub const BIN_NAME_TOO_LONG: ResultCode = ResultCode(21);
    /// Operation not allowed at this time
    pub const FAIL_FORBIDDEN: ResultCode = ResultCode(22);
    /// Collection element not found
    pub const ELEMENT_NOT_FOUND: ResultCode = ResultCode(23);
    /// Collection element already exists
    pub const ELEMENT_EXISTS: ResultCode = ResultCode(24);
    /// Operation not applicable
    pub const OP_NOT_APPLICABLE: ResultCode = ResultCode(26);
    /// Record skipped by a filter expression
    pub const FILTERED_OUT: ResultCode = ResultCode(27);
    /// Write lost a conflict resolution
    pub const LOST_CONFLICT: ResultCode = ResultCode(28);
    /// UDF returned an error; the record carries a `FAILURE` bin
    pub const UDF_BAD_RESPONSE: ResultCode = ResultCode(100);
    /// Record is locked by another transaction
    pub const MRT_BLOCKED: ResultCode = ResultCode(120);
    /// Record version changed since the transaction read it
    pub const MRT_VERSION_MISMATCH: ResultCode = ResultCode(121);
    /// Transaction deadline reached
    pub const MRT_EXPIRED: ResultCode = ResultCode(122);
    /// Transaction has too many writes
    pub const MRT_TOO_MANY_WRITES: ResultCode = ResultCode(123);
    /// Transaction already committed
    pub const MRT_COMMITTED: ResultCode = ResultCode(124);
    /// Transaction already aborted
    pub const MRT_ABORTED: ResultCode = ResultCode(125);
    /// Batch support disabled
    pub const BATCH_DISABLED: ResultCode = ResultCode(150);
    /// Too many batch keys
    pub const BATCH_MAX_REQUESTS_EXCEEDED: ResultCode = ResultCode(151);
    /// Batch queues full
    pub const BATCH_QUEUES_FULL: ResultCode = ResultCode(152);

    /// Build from a wire byte.
    pub fn from_wire(code: u8) -> ResultCode {
        ResultCode(code as i32)
    }

    /// True for `OK`
    pub fn is_ok(self) -> bool {
        self == ResultCode::OK
    }

    /// Server codes that a retry against a fresh partition map or a less
    /// busy node can resolve.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ResultCode::CLUSTER_KEY_MISMATCH
                | ResultCode::KEY_BUSY
                | ResultCode::DEVICE_OVERLOAD
                | ResultCode::PARTITION_UNAVAILABLE
                | ResultCode::TIMEOUT
                | ResultCode::BATCH_QUEUES_FULL
        )
    }

    /// Short description
    pub fn message(self) -> &'static str {
        match self {
            ResultCode::TXN_FAILED => "transaction failed",
            ResultCode::TXN_ALREADY_COMMITTED => "transaction already committed",
            ResultCode::TXN_ALREADY_ABORTED => "transaction already aborted",
            ResultCode::BATCH_FAILED => "one or more batch keys failed",
            ResultCode::NO_RESPONSE => "no response received",
            ResultCode::CONFIG_ERROR => "invalid configuration",
            ResultCode::NO_MORE_CONNECTIONS => "no more connections available",
            ResultCode::DECODE_ERROR => "record decoding failed",
            ResultCode::INVALID_ARGUMENT => "invalid argument",
            ResultCode::NETWORK_ERROR => "network error",
            ResultCode::INVALID_NODE => "invalid node",
            ResultCode::PARSE_ERROR => "parse error",
            ResultCode::CLIENT_ERROR => "client error",
            ResultCode::OK => "ok",
            ResultCode::SERVER_ERROR => "server error",
            ResultCode::KEY_NOT_FOUND => "key not found",
            ResultCode::GENERATION_ERROR => "generation error",
            ResultCode::PARAMETER_ERROR => "parameter error",
            ResultCode::KEY_EXISTS => "key already exists",
            ResultCode::BIN_EXISTS => "bin already exists",
            ResultCode::CLUSTER_KEY_MISMATCH => "cluster key mismatch",
            ResultCode::SERVER_MEM_ERROR => "server memory error",
            ResultCode::TIMEOUT => "timeout",
            ResultCode::ALWAYS_FORBIDDEN => "operation always forbidden",
            ResultCode::PARTITION_UNAVAILABLE => "partition unavailable",
            ResultCode::BIN_TYPE_ERROR => "bin type error",
            ResultCode::RECORD_TOO_BIG => "record too big",
            ResultCode::KEY_BUSY => "hot key",
            ResultCode::UNSUPPORTED_FEATURE => "unsupported feature",
            ResultCode::BIN_NOT_FOUND => "bin not found",
            ResultCode::DEVICE_OVERLOAD => "device overload",
            ResultCode::KEY_MISMATCH => "key mismatch",
            ResultCode::INVALID_NAMESPACE => "namespace not found",
            ResultCode::BIN_NAME_TOO_LONG => "bin name too long",
            ResultCode::FAIL_FORBIDDEN => "operation forbidden",
            ResultCode::ELEMENT_NOT_FOUND => "element not found",
            ResultCode::ELEMENT_EXISTS => "element exists",
            ResultCode::OP_NOT_APPLICABLE => "operation not applicable",
            ResultCode::FILTERED_OUT => "filtered out",
            ResultCode::LOST_CONFLICT => "lost conflict",
            ResultCode::UDF_BAD_RESPONSE => "UDF returned error",
            ResultCode::MRT_BLOCKED => "record blocked by another transaction",
            ResultCode::MRT_VERSION_MISMATCH => "transaction version mismatch",
            ResultCode::MRT_EXPIRED => "transaction expired",
            ResultCode::MRT_TOO_MANY_WRITES => "transaction has too many writes",
            ResultCode::MRT_COMMITTED => "transaction committed",
            ResultCode::MRT_ABORTED => "transaction aborted",
            ResultCode::BATCH_DISABLED => "batch disabled",
            ResultCode::BATCH_MAX_REQUESTS_EXCEEDED => "batch max requests exceeded",
            ResultCode::BATCH_QUEUES_FULL => "batch queues full",
            _ => "unknown result code",
        }
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultCode({}: {})", self.0, self.message())
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_codes() {
        assert!(ResultCode::CLUSTER_KEY_MISMATCH.is_retryable());
        assert!(ResultCode::KEY_BUSY.is_retryable());
        assert!(!ResultCode::KEY_NOT_FOUND.is_retryable());
        assert!(!ResultCode::GENERATION_ERROR.is_retryable());
    }

    #[test]
    fn test_display_contains_code() {
        let s = ResultCode::FILTERED_OUT.to_string();
        assert!(s.contains("filtered out"));
        assert!(s.contains("27"));
        assert_eq!(ResultCode(240).message(), "unknown result code");
    }

    #[test]
    fn test_from_wire() {
        assert_eq!(ResultCode::from_wire(2), ResultCode::KEY_NOT_FOUND);
        assert!(ResultCode::from_wire(0).is_ok());
    }
}
