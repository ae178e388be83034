//! Async batched logger configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of the batched log writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Write-queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Entries per batch write
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Flush interval in milliseconds
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// Rows older than this many seconds are flushed by the janitor;
    /// zero disables retention flushing
    #[serde(default)]
    pub retention_secs: u64,
    /// Pending pre-hook records older than this many seconds are dropped
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
    /// Janitor tick period in seconds
    #[serde(default = "default_janitor_period_secs")]
    pub janitor_period_secs: u64,
}

fn default_queue_capacity() -> usize {
    10_000
}
fn default_max_batch_size() -> usize {
    100
}
fn default_batch_interval_ms() -> u64 {
    50
}
fn default_pending_ttl_secs() -> u64 {
    300
}
fn default_janitor_period_secs() -> u64 {
    60
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_batch_size: default_max_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
            retention_secs: 0,
            pending_ttl_secs: default_pending_ttl_secs(),
            janitor_period_secs: default_janitor_period_secs(),
        }
    }
}

impl LoggerConfig {
    /// Flush interval as a [`Duration`]
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Pending record TTL as a [`Duration`]
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    /// Janitor period as a [`Duration`]
    pub fn janitor_period(&self) -> Duration {
        Duration::from_secs(self.janitor_period_secs)
    }
}
