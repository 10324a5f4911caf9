//! Client configuration via `meridian.toml`
//!
//! Timeouts are written in milliseconds. Anything missing from the file takes
//! its default, so an empty file is a valid configuration.

use crate::error::{Error, Result};
use crate::policy::{BasePolicy, BatchPolicy, Replica, WritePolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "meridian.toml";

/// Batch settings, the `[batch]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    /// 1 = sequential, 0 = one thread per node, n = at most n threads
    #[serde(default = "default_concurrent_nodes")]
    pub concurrent_nodes: usize,
    /// Report per-node failures per key instead of failing the call
    #[serde(default = "default_true")]
    pub allow_partial_results: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            concurrent_nodes: default_concurrent_nodes(),
            allow_partial_results: true,
        }
    }
}

fn default_concurrent_nodes() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_total_timeout_ms() -> u64 {
    1000
}

fn default_socket_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_sleep_multiplier() -> f64 {
    1.0
}

fn default_replica() -> String {
    "sequence".to_string()
}

/// Client configuration loaded from `meridian.toml`.
///
/// # Example
///
/// ```toml
/// total_timeout_ms = 1000
/// socket_timeout_ms = 30000
/// max_retries = 2
/// replica = "sequence"
///
/// [batch]
/// concurrent_nodes = 1
/// allow_partial_results = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Total deadline per call
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
    /// Per-attempt socket timeout
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,
    /// Drain window for timed-out connections
    #[serde(default)]
    pub timeout_delay_ms: u64,
    /// Retries for reads
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retries for writes
    #[serde(default)]
    pub write_max_retries: u32,
    /// Sleep before the first retry
    #[serde(default)]
    pub sleep_between_retries_ms: u64,
    /// Backoff multiplier
    #[serde(default = "default_sleep_multiplier")]
    pub sleep_multiplier: f64,
    /// `"master"`, `"master_proles"`, `"sequence"`, `"prefer_rack"` or `"random"`
    #[serde(default = "default_replica")]
    pub replica: String,
    /// Compress requests and ask for compressed responses
    #[serde(default)]
    pub use_compression: bool,
    /// Send user keys with writes
    #[serde(default)]
    pub send_key: bool,
    /// Raise filtered-out on single-key commands
    #[serde(default)]
    pub fail_on_filtered_out: bool,
    /// Racks preferred by `prefer_rack`
    #[serde(default)]
    pub rack_ids: Vec<u32>,
    /// Default transaction timeout in seconds (0 = server default)
    #[serde(default)]
    pub txn_timeout_secs: u32,
    /// Batch settings
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            total_timeout_ms: default_total_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            timeout_delay_ms: 0,
            max_retries: default_max_retries(),
            write_max_retries: 0,
            sleep_between_retries_ms: 0,
            sleep_multiplier: default_sleep_multiplier(),
            replica: default_replica(),
            use_compression: false,
            send_key: false,
            fail_on_filtered_out: false,
            rack_ids: Vec::new(),
            txn_timeout_secs: 0,
            batch: BatchConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse the replica name.
    ///
    /// # Errors
    ///
    /// Returns a config error for unknown names.
    pub fn replica(&self) -> Result<Replica> {
        Replica::from_name(&self.replica).ok_or_else(|| {
            Error::Config(format!(
                "Invalid replica '{}' in {}. Expected \"master\", \"master_proles\", \"sequence\", \"prefer_rack\" or \"random\".",
                self.replica, CONFIG_FILE_NAME
            ))
        })
    }

    /// Check values that serde cannot check.
    pub fn validate(&self) -> Result<()> {
        self.replica()?;
        if self.sleep_multiplier.is_nan() || self.sleep_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "sleep_multiplier must be >= 1.0, got {}",
                self.sleep_multiplier
            )));
        }
        Ok(())
    }

    /// Parse a TOML string and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Meridian client configuration

# Deadline for a whole call, retries included (0 = no deadline)
total_timeout_ms = 1000
# Per-attempt socket timeout (0 = remaining total budget)
socket_timeout_ms = 30000
# Time a timed-out connection may spend draining before it is closed
timeout_delay_ms = 0

max_retries = 2
write_max_retries = 0
sleep_between_retries_ms = 0
sleep_multiplier = 1.0

# "master", "master_proles", "sequence", "prefer_rack" or "random"
replica = "sequence"
# rack_ids = [1, 2]

use_compression = false
send_key = false
fail_on_filtered_out = false

# Transaction timeout in seconds (0 = server default)
txn_timeout_secs = 0

[batch]
# 1 = nodes in sequence, 0 = one thread per node, n = at most n threads
concurrent_nodes = 1
allow_partial_results = true
"#
    }

    /// Base policy for reads
    pub fn read_policy(&self) -> Result<BasePolicy> {
        Ok(BasePolicy {
            total_timeout: Duration::from_millis(self.total_timeout_ms),
            socket_timeout: Duration::from_millis(self.socket_timeout_ms),
            timeout_delay: Duration::from_millis(self.timeout_delay_ms),
            max_retries: self.max_retries,
            sleep_between_retries: Duration::from_millis(self.sleep_between_retries_ms),
            sleep_multiplier: self.sleep_multiplier,
            replica: self.replica()?,
            use_compression: self.use_compression,
            send_key: self.send_key,
            fail_on_filtered_out: self.fail_on_filtered_out,
            ..BasePolicy::default()
        })
    }

    /// Policy for single-key writes
    pub fn write_policy(&self) -> Result<WritePolicy> {
        let mut base = self.read_policy()?;
        base.max_retries = self.write_max_retries;
        Ok(WritePolicy::from_base(base))
    }

    /// Parent policy for batch calls
    pub fn batch_policy(&self) -> Result<BatchPolicy> {
        Ok(BatchPolicy {
            base: self.read_policy()?,
            concurrent_nodes: self.batch.concurrent_nodes,
            allow_partial_results: self.batch.allow_partial_results,
        })
    }
}
