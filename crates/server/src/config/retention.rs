use std::time::Duration;

use serde::Deserialize;

use jejak_audit::RetentionConfig;
use jejak_audit::retention::DEFAULT_SCHEDULE;

/// Retention pruner configuration.
///
/// `enabled` only controls the background schedule; manual cleanup and
/// retention statistics stay available either way.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSettings {
    /// Run sweeps on `schedule`.
    #[serde(default = "default_retention_enabled")]
    pub enabled: bool,
    /// Records older than this many days are deleted.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    /// Records deleted per store call.
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: u32,
    /// Pause between delete calls in milliseconds.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// Cron expression for scheduled sweeps (UTC).
    #[serde(default = "default_schedule")]
    pub schedule: String,
}

impl RetentionSettings {
    /// Convert into the pipeline's retention configuration.
    pub fn to_retention_config(&self) -> RetentionConfig {
        RetentionConfig {
            horizon_days: self.horizon_days,
            delete_batch_size: self.delete_batch_size,
            batch_pause: Duration::from_millis(self.batch_pause_ms),
            schedule: self.schedule.clone(),
        }
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            enabled: default_retention_enabled(),
            horizon_days: default_horizon_days(),
            delete_batch_size: default_delete_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            schedule: default_schedule(),
        }
    }
}

fn default_retention_enabled() -> bool {
    true
}

fn default_horizon_days() -> u32 {
    730
}

fn default_delete_batch_size() -> u32 {
    1000
}

fn default_batch_pause_ms() -> u64 {
    100
}

fn default_schedule() -> String {
    DEFAULT_SCHEDULE.to_owned()
}
