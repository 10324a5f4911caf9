//! Records returned by the server

use crate::value::Value;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the Unix epoch and the server's 2010-01-01 epoch
pub const CITRUSLEAF_EPOCH: u64 = 1_262_304_000;

/// Bins, generation and expiration of one record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Bin name to value
    pub bins: HashMap<String, Value>,
    /// Write counter maintained by the server
    pub generation: u32,
    /// Void time in seconds since the server epoch; 0 never expires
    pub expiration: u32,
}

impl Record {
    /// Create a record
    pub fn new(bins: HashMap<String, Value>, generation: u32, expiration: u32) -> Self {
        Record {
            bins,
            generation,
            expiration,
        }
    }

    /// Look up a bin
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }

    /// Time left before expiration; `None` when the record never expires.
    pub fn ttl(&self) -> Option<Duration> {
        if self.expiration == 0 {
            return None;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let void_time = CITRUSLEAF_EPOCH + self.expiration as u64;
        Some(Duration::from_secs(void_time.saturating_sub(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_never_expires() {
        let r = Record::default();
        assert!(r.ttl().is_none());
    }

    #[test]
    fn test_ttl_in_past_is_zero() {
        let r = Record::new(HashMap::new(), 1, 1);
        assert_eq!(r.ttl(), Some(Duration::ZERO));
    }
}
