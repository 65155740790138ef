//! Wiring of the audit pipeline components from configuration.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use jejak_audit::store::AuditStore;
use jejak_audit::{AuditQueryService, AuditRecorder, BatchWriter, RetentionPruner, WriteBehindQueue};

use crate::config::JejakConfig;
use crate::error::ServerError;

/// The assembled audit pipeline: recorder, query service and pruner over one store.
pub struct AuditPipeline {
    pub store: Arc<dyn AuditStore>,
    pub recorder: Arc<AuditRecorder>,
    pub queries: AuditQueryService,
    pub pruner: Arc<RetentionPruner>,
}

impl AuditPipeline {
    /// Build the pipeline. Must be called inside a Tokio runtime when the
    /// queue is enabled, since the queue spawns its flush worker.
    pub fn from_config(store: Arc<dyn AuditStore>, config: &JejakConfig) -> Result<Self, ServerError> {
        let writer = BatchWriter::new(Arc::clone(&store));

        let queue = if config.queue.enabled {
            let queue = WriteBehindQueue::new(writer.clone(), config.queue.to_queue_config())?;
            info!(
                batch_size = config.queue.batch_size,
                flush_interval_ms = config.queue.flush_interval_ms,
                "audit write-behind queue enabled"
            );
            Some(Arc::new(queue))
        } else {
            info!("audit write-behind queue disabled, writing directly");
            None
        };

        let recorder = Arc::new(AuditRecorder::with_writer(writer, queue));
        let pruner = Arc::new(RetentionPruner::new(
            Arc::clone(&store),
            config.retention.to_retention_config(),
        )?);

        Ok(Self {
            queries: AuditQueryService::new(Arc::clone(&store)),
            store,
            recorder,
            pruner,
        })
    }

    /// Start the retention schedule. Stops when `cancel` fires.
    pub fn spawn_retention(&self, cancel: CancellationToken) -> JoinHandle<()> {
        info!(
            schedule = %self.pruner.config().schedule,
            horizon_days = self.pruner.config().horizon_days,
            "audit retention schedule started"
        );
        Arc::clone(&self.pruner).spawn_schedule(cancel)
    }
}
