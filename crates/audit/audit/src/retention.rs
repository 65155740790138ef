//! Age-based pruning of audit records.
//!
//! A sweep deletes every record created before `now - horizon` in bounded
//! pages. The predicate is fixed for the whole sweep and new records are
//! always stamped after `now`, so ingestion can continue concurrently without
//! any record written during the sweep becoming eligible.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AuditError;
use crate::store::AuditStore;

/// Default cron schedule: 00:00 UTC on the first day of every month.
pub const DEFAULT_SCHEDULE: &str = "0 0 1 * *";

/// Configuration for the retention pruner.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Records older than this many days are deleted (default: 730).
    pub horizon_days: u32,
    /// Maximum records deleted per store call (default: 1000).
    pub delete_batch_size: u32,
    /// Pause between consecutive delete calls (default: 100 ms).
    pub batch_pause: Duration,
    /// Cron expression for scheduled sweeps (default: monthly).
    pub schedule: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_days: 730,
            delete_batch_size: 1000,
            batch_pause: Duration::from_millis(100),
            schedule: DEFAULT_SCHEDULE.to_owned(),
        }
    }
}

impl RetentionConfig {
    /// Reject unusable settings, including an unparseable schedule.
    pub fn validate(&self) -> Result<(), AuditError> {
        validate_horizon(self.horizon_days)?;
        if self.delete_batch_size == 0 {
            return Err(AuditError::InvalidConfig(
                "retention delete_batch_size must be > 0".into(),
            ));
        }
        parse_schedule(&self.schedule).map(|_| ())
    }
}

/// Outcome of one pruning sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Records created before this instant were targeted.
    pub cutoff: DateTime<Utc>,
    /// Horizon used to compute the cutoff.
    pub horizon_days: u32,
    /// Records eligible when the sweep started.
    pub eligible: u64,
    /// Records actually deleted.
    pub deleted: u64,
    /// Number of delete calls issued.
    pub batches: u32,
}

/// Read-only retention figures for operational visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionStats {
    /// Total records in the store.
    pub total: u64,
    /// Creation time of the oldest record.
    pub oldest: Option<DateTime<Utc>>,
    /// Creation time of the newest record.
    pub newest: Option<DateTime<Utc>>,
    /// Records that the next sweep would delete.
    pub eligible: u64,
    /// Configured horizon in days.
    pub horizon_days: u32,
    /// Current cutoff for the configured horizon.
    pub cutoff: DateTime<Utc>,
}

/// Deletes audit records older than the retention horizon.
pub struct RetentionPruner {
    store: Arc<dyn AuditStore>,
    config: RetentionConfig,
    schedule: croner::Cron,
}

impl RetentionPruner {
    /// Create a pruner, validating the configuration and cron schedule.
    pub fn new(store: Arc<dyn AuditStore>, config: RetentionConfig) -> Result<Self, AuditError> {
        config.validate()?;
        let schedule = parse_schedule(&config.schedule)?;
        Ok(Self {
            store,
            config,
            schedule,
        })
    }

    /// The pruner's configuration.
    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Cutoff instant for a horizon measured back from `now`.
    pub fn cutoff_for(horizon_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(horizon_days))
    }

    /// Delete every record created strictly before `cutoff`, one page at a time.
    ///
    /// Stops as soon as a page deletes fewer than `delete_batch_size` records.
    /// Errors abort the sweep and are returned.
    pub async fn sweep(&self, cutoff: DateTime<Utc>, horizon_days: u32) -> Result<PruneReport, AuditError> {
        let mut report = PruneReport {
            cutoff,
            horizon_days,
            eligible: 0,
            deleted: 0,
            batches: 0,
        };

        report.eligible = self.store.count_older_than(cutoff).await?;
        if report.eligible == 0 {
            info!(%cutoff, "audit retention: nothing to prune");
            return Ok(report);
        }
        info!(eligible = report.eligible, %cutoff, "audit retention sweep starting");

        let batch = self.config.delete_batch_size;
        loop {
            let deleted = self.store.delete_older_than(cutoff, batch).await?;
            report.batches += 1;
            report.deleted += deleted;
            debug!(deleted, total = report.deleted, "audit retention page deleted");

            if deleted < u64::from(batch) {
                break;
            }
            tokio::time::sleep(self.config.batch_pause).await;
        }

        info!(
            deleted = report.deleted,
            batches = report.batches,
            "audit retention sweep complete"
        );
        Ok(report)
    }

    /// Run a sweep on demand, optionally with a different horizon.
    pub async fn run_manual(&self, horizon_override: Option<u32>) -> Result<PruneReport, AuditError> {
        let horizon_days = horizon_override.unwrap_or(self.config.horizon_days);
        validate_horizon(horizon_days)?;
        let cutoff = Self::cutoff_for(horizon_days, Utc::now());
        info!(horizon_days, "manual audit retention sweep requested");
        self.sweep(cutoff, horizon_days).await
    }

    /// Run a sweep with the configured horizon, logging instead of returning
    /// errors. The next scheduled run retries naturally.
    pub async fn run_scheduled(&self) {
        let horizon_days = self.config.horizon_days;
        let cutoff = Self::cutoff_for(horizon_days, Utc::now());
        if let Err(e) = self.sweep(cutoff, horizon_days).await {
            error!(error = %e, "audit retention sweep failed, will retry on next schedule");
        }
    }

    /// Report record counts and how many are currently eligible for pruning.
    pub async fn stats(&self) -> Result<RetentionStats, AuditError> {
        let horizon_days = self.config.horizon_days;
        let cutoff = Self::cutoff_for(horizon_days, Utc::now());
        let s = self.store.stats(cutoff).await?;
        Ok(RetentionStats {
            total: s.total,
            oldest: s.oldest,
            newest: s.newest,
            eligible: s.eligible,
            horizon_days,
            cutoff,
        })
    }

    /// Next scheduled run strictly after `after`.
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.find_next_occurrence(&after, false).ok()
    }

    /// Spawn a background task running sweeps on the configured schedule
    /// until `cancel` fires. An in-progress sweep is not interrupted.
    pub fn spawn_schedule(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut after = Utc::now();
            loop {
                let Some(next) = self.next_run_after(after) else {
                    warn!(schedule = %self.config.schedule, "audit retention schedule has no future runs");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                debug!(%next, "next audit retention sweep scheduled");

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(wait) => self.run_scheduled().await,
                }
                after = next.max(Utc::now());
            }
            debug!("audit retention schedule stopped");
        })
    }
}

fn validate_horizon(horizon_days: u32) -> Result<(), AuditError> {
    if horizon_days == 0 {
        return Err(AuditError::InvalidConfig(
            "retention horizon must be at least one day".into(),
        ));
    }
    Ok(())
}

/// Parse a cron expression for the retention schedule.
pub fn parse_schedule(expr: &str) -> Result<croner::Cron, AuditError> {
    croner::Cron::new(expr)
        .parse()
        .map_err(|e| AuditError::InvalidConfig(format!("invalid retention schedule '{expr}': {e}")))
}
