use std::time::Duration;

use serde::Deserialize;

use jejak_audit::QueueConfig;

/// Write-behind queue configuration.
///
/// # Example
///
/// ```toml
/// [queue]
/// enabled = true
/// batch_size = 50
/// flush_interval_ms = 5000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Buffer events in the write-behind queue. When `false` every event is
    /// written directly.
    #[serde(default = "default_queue_enabled")]
    pub enabled: bool,
    /// Pending events that trigger a flush, and events per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Timer flush interval in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Soft cap on pending events before enqueue falls back to direct writes.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl QueueSettings {
    /// Convert into the pipeline's queue configuration.
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            max_pending: self.max_pending,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: default_queue_enabled(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            max_pending: default_max_pending(),
        }
    }
}

fn default_queue_enabled() -> bool {
    true
}

fn default_batch_size() -> usize {
    50
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_max_pending() -> usize {
    10_000
}
