//! The single entry point business code uses to record audit events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::event::AuditEvent;
use crate::queue::{QueueStats, WriteBehindQueue};
use crate::store::AuditStore;
use crate::writer::BatchWriter;

/// Counters for writes that bypassed the queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectWriteStats {
    /// Events written directly (queue disabled or rejecting).
    pub direct_writes: u64,
    /// Direct writes that failed and were discarded.
    pub direct_failures: u64,
}

/// Facade that records audit events without ever failing or blocking the caller.
///
/// With a queue the recorder enqueues; without one, or when the queue hands
/// an event back, it writes the event directly on a tracked background task.
/// [`record`](Self::record) deliberately returns nothing: an audit failure
/// must not abort the business operation being audited.
pub struct AuditRecorder {
    writer: BatchWriter,
    queue: Option<Arc<WriteBehindQueue>>,
    direct_tasks: TaskTracker,
    direct_writes: Arc<AtomicU64>,
    direct_failures: Arc<AtomicU64>,
}

impl AuditRecorder {
    /// Create a recorder. Passing `None` for `queue` selects direct-write mode.
    pub fn new(store: Arc<dyn AuditStore>, queue: Option<Arc<WriteBehindQueue>>) -> Self {
        Self::with_writer(BatchWriter::new(store), queue)
    }

    /// Create a recorder sharing an existing writer (and its clock) with the queue.
    pub fn with_writer(writer: BatchWriter, queue: Option<Arc<WriteBehindQueue>>) -> Self {
        Self {
            writer,
            queue,
            direct_tasks: TaskTracker::new(),
            direct_writes: Arc::new(AtomicU64::new(0)),
            direct_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether events go through the write-behind queue.
    pub fn uses_queue(&self) -> bool {
        self.queue.is_some()
    }

    /// The queue, when running in queue mode.
    pub fn queue(&self) -> Option<&Arc<WriteBehindQueue>> {
        self.queue.as_ref()
    }

    /// Queue statistics, or `None` in direct-write mode.
    pub fn queue_stats(&self) -> Option<QueueStats> {
        self.queue.as_ref().map(|q| q.stats())
    }

    /// Counters for writes that bypassed the queue.
    pub fn direct_stats(&self) -> DirectWriteStats {
        DirectWriteStats {
            direct_writes: self.direct_writes.load(Ordering::Relaxed),
            direct_failures: self.direct_failures.load(Ordering::Relaxed),
        }
    }

    /// Record an audit event.
    ///
    /// Never blocks on I/O and never reports failure to the caller.
    pub fn record(&self, event: AuditEvent) {
        let event = match &self.queue {
            Some(queue) => match queue.enqueue(event) {
                Ok(()) => return,
                Err(e) => {
                    warn!(reason = %e, "audit enqueue rejected, writing directly");
                    e.into_event()
                }
            },
            None => event,
        };
        self.write_direct(event);
    }

    fn write_direct(&self, event: AuditEvent) {
        let Ok(handle) = Handle::try_current() else {
            error!(
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                action = %event.action,
                "no async runtime available, audit event discarded"
            );
            self.direct_failures.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let writer = self.writer.clone();
        let writes = Arc::clone(&self.direct_writes);
        let failures = Arc::clone(&self.direct_failures);
        self.direct_tasks.spawn_on(
            async move {
                let entity_type = event.entity_type.clone();
                let entity_id = event.entity_id.clone();
                match writer.insert_one(event).await {
                    Ok(_) => {
                        writes.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        error!(
                            error = %e,
                            %entity_type,
                            %entity_id,
                            "direct audit write failed"
                        );
                    }
                }
            },
            &handle,
        );
    }

    /// Flush buffered events and wait for outstanding direct writes.
    ///
    /// Call once from the process shutdown sequence. Best effort: the process
    /// may still be killed before this completes.
    pub async fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            let pending = queue.size();
            info!(pending, "draining audit queue");
            queue.drain().await;
        }
        // Drain may have handed events to direct writes; wait for those too.
        self.direct_tasks.close();
        self.direct_tasks.wait().await;

        let stats = self.direct_stats();
        match self.queue_stats() {
            Some(q) if q.dropped > 0 || stats.direct_failures > 0 => warn!(
                dropped = q.dropped,
                direct_failures = stats.direct_failures,
                "audit recorder shut down with lost events"
            ),
            None if stats.direct_failures > 0 => warn!(
                direct_failures = stats.direct_failures,
                "audit recorder shut down with lost events"
            ),
            _ => info!("audit recorder shut down cleanly"),
        }
    }
}
