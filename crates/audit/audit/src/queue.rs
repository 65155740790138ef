//! Write-behind buffering of audit events.
//!
//! Producers append events to an in-memory list; a single background worker
//! moves them to the store in batches, triggered either by the list reaching
//! the batch size or by a recurring timer.
//!
//! Events are removed from the list *before* the write is attempted. A failed
//! write therefore loses that batch instead of re-enqueueing it: memory stays
//! bounded and a broken store cannot cause a retry storm. A crash between
//! removal and write loses the in-flight batch as well.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::writer::BatchWriter;

/// Configuration for the write-behind queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Pending-list length that triggers a flush, and the maximum number of
    /// events written per flush (default: 50).
    pub batch_size: usize,
    /// How often the timer flushes a partial batch (default: 5 seconds).
    pub flush_interval: Duration,
    /// Soft cap on pending events; beyond it `enqueue` hands events back
    /// (default: 10 000).
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval: Duration::from_millis(5000),
            max_pending: 10_000,
        }
    }
}

impl QueueConfig {
    /// Reject unusable settings.
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.batch_size == 0 {
            return Err(AuditError::InvalidConfig("queue batch_size must be > 0".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(AuditError::InvalidConfig(
                "queue flush_interval must be > 0".into(),
            ));
        }
        if self.max_pending < self.batch_size {
            return Err(AuditError::InvalidConfig(
                "queue max_pending must be >= batch_size".into(),
            ));
        }
        Ok(())
    }
}

/// Why an event was not accepted by [`WriteBehindQueue::enqueue`].
///
/// The event is handed back so the caller can write it another way.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// The queue has been drained for shutdown.
    #[error("audit queue is closed")]
    Closed(Box<AuditEvent>),
    /// The pending list is over its soft cap.
    #[error("audit queue is full ({pending} pending)")]
    Full {
        /// Pending-list length at rejection time.
        pending: usize,
        /// The rejected event.
        event: Box<AuditEvent>,
    },
}

impl EnqueueError {
    /// Recover the rejected event.
    pub fn into_event(self) -> AuditEvent {
        match self {
            Self::Closed(event) | Self::Full { event, .. } => *event,
        }
    }
}

/// Result of a single [`WriteBehindQueue::flush`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    /// Another flush was already running; nothing was done.
    Busy,
    /// A batch was written.
    Written {
        /// Events taken from the pending list.
        events: usize,
        /// Records the store reported as inserted.
        inserted: u64,
    },
    /// The write failed and the batch was discarded.
    Dropped {
        /// Events lost.
        events: usize,
    },
}

/// Atomic counters tracking queue throughput.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Events accepted by `enqueue`.
    pub enqueued: AtomicU64,
    /// Events handed to a successful batch write.
    pub flushed: AtomicU64,
    /// Events discarded because their batch write failed.
    pub dropped: AtomicU64,
    /// Batch writes that failed.
    pub failed_flushes: AtomicU64,
    /// Events handed back by `enqueue` (closed or full).
    pub rejected: AtomicU64,
}

/// Point-in-time view of the queue for operational reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Events currently waiting to be flushed.
    pub pending: usize,
    /// Whether a flush is executing right now.
    pub flushing: bool,
    /// Whether the queue has been closed by `drain`.
    pub closed: bool,
    /// Configured batch size.
    pub batch_size: usize,
    /// Configured flush interval in milliseconds.
    pub flush_interval_ms: u64,
    /// Events accepted since startup.
    pub enqueued: u64,
    /// Events written since startup.
    pub flushed: u64,
    /// Events lost to failed flushes since startup.
    pub dropped: u64,
    /// Failed flushes since startup.
    pub failed_flushes: u64,
    /// Events rejected by `enqueue` since startup.
    pub rejected: u64,
}

struct Shared {
    pending: Mutex<VecDeque<AuditEvent>>,
    flushing: AtomicBool,
    closed: AtomicBool,
    flush_now: Notify,
    flush_done: Notify,
    writer: BatchWriter,
    config: QueueConfig,
    metrics: QueueMetrics,
}

/// Clears the flush-in-progress flag when the flush ends, however it ends,
/// and wakes everyone waiting for it.
struct FlushGuard<'a> {
    flushing: &'a AtomicBool,
    done: &'a Notify,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flushing.store(false, Ordering::Release);
        self.done.notify_waiters();
    }
}

impl Shared {
    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Like [`flush`](Self::flush), but waits out a concurrent flush instead
    /// of returning [`FlushOutcome::Busy`].
    async fn flush_waiting(&self) -> FlushOutcome {
        loop {
            // Register before trying so a flush ending in between still wakes us.
            let done = self.flush_done.notified();
            tokio::pin!(done);
            done.as_mut().enable();

            match self.flush().await {
                FlushOutcome::Busy => done.await,
                outcome => return outcome,
            }
        }
    }

    async fn flush(&self) -> FlushOutcome {
        if self.pending_len() == 0 {
            return FlushOutcome::Idle;
        }
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return FlushOutcome::Busy;
        }
        let _guard = FlushGuard {
            flushing: &self.flushing,
            done: &self.flush_done,
        };

        let batch: Vec<AuditEvent> = {
            let mut pending = self.pending.lock();
            let n = pending.len().min(self.config.batch_size);
            pending.drain(..n).collect()
        };
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        let events = batch.len();
        match self.writer.insert_batch(batch).await {
            Ok(inserted) => {
                self.metrics
                    .flushed
                    .fetch_add(events as u64, Ordering::Relaxed);
                debug!(events, inserted, "audit batch flushed");
                FlushOutcome::Written { events, inserted }
            }
            Err(e) => {
                self.metrics
                    .dropped
                    .fetch_add(events as u64, Ordering::Relaxed);
                self.metrics.failed_flushes.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, dropped = events, "audit flush failed, batch discarded");
                FlushOutcome::Dropped { events }
            }
        }
    }
}

/// In-memory write-behind buffer in front of a [`BatchWriter`].
///
/// At most one flush runs at a time. `enqueue` never performs I/O: it appends
/// under a short lock and, when the batch size is reached, signals the
/// background worker.
pub struct WriteBehindQueue {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteBehindQueue {
    /// Create the queue and spawn its background worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(writer: BatchWriter, config: QueueConfig) -> Result<Self, AuditError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            pending: Mutex::new(VecDeque::with_capacity(config.batch_size)),
            flushing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            flush_now: Notify::new(),
            flush_done: Notify::new(),
            writer,
            config,
            metrics: QueueMetrics::default(),
        });
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), cancel.clone()));

        Ok(Self {
            shared,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Append an event to the tail of the pending list.
    ///
    /// Returns immediately. Rejects only after [`drain`](Self::drain) has
    /// closed the queue or when the soft cap is exceeded; the event is then
    /// returned inside the error.
    pub fn enqueue(&self, event: AuditEvent) -> Result<(), EnqueueError> {
        let len = {
            let mut pending = self.shared.pending.lock();
            if self.shared.closed.load(Ordering::Acquire) {
                self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(EnqueueError::Closed(Box::new(event)));
            }
            if pending.len() >= self.shared.config.max_pending {
                self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(EnqueueError::Full {
                    pending: pending.len(),
                    event: Box::new(event),
                });
            }
            pending.push_back(event);
            pending.len()
        };

        self.shared.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
        if len >= self.shared.config.batch_size {
            self.shared.flush_now.notify_one();
        }
        Ok(())
    }

    /// Write up to one batch from the head of the pending list.
    ///
    /// Returns immediately with [`FlushOutcome::Busy`] if another flush is in
    /// progress, or [`FlushOutcome::Idle`] if nothing is pending.
    pub async fn flush(&self) -> FlushOutcome {
        self.shared.flush().await
    }

    /// Stop the timer and flush everything still pending.
    ///
    /// The queue is closed first, so later `enqueue` calls are rejected with
    /// [`EnqueueError::Closed`]. Waits for each flush to complete, including
    /// one already in flight when `drain` was called.
    pub async fn drain(&self) {
        {
            let _pending = self.shared.pending.lock();
            self.shared.closed.store(true, Ordering::Release);
        }
        self.cancel.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "audit queue worker ended abnormally");
        }

        let mut batches = 0usize;
        loop {
            match self.shared.flush_waiting().await {
                FlushOutcome::Idle => break,
                FlushOutcome::Written { .. } | FlushOutcome::Dropped { .. } => batches += 1,
                FlushOutcome::Busy => {}
            }
        }
        // The list can be empty while another flush still holds the last batch.
        loop {
            let done = self.shared.flush_done.notified();
            tokio::pin!(done);
            done.as_mut().enable();
            if !self.is_flushing() {
                break;
            }
            done.await;
        }
        info!(batches, "audit queue drained");
    }

    /// Current pending-list length.
    pub fn size(&self) -> usize {
        self.shared.pending_len()
    }

    /// Whether a flush is executing right now.
    pub fn is_flushing(&self) -> bool {
        self.shared.flushing.load(Ordering::Acquire)
    }

    /// The queue's configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Snapshot of queue state and counters.
    pub fn stats(&self) -> QueueStats {
        let m = &self.shared.metrics;
        QueueStats {
            pending: self.size(),
            flushing: self.is_flushing(),
            closed: self.shared.closed.load(Ordering::Acquire),
            batch_size: self.shared.config.batch_size,
            flush_interval_ms: u64::try_from(self.shared.config.flush_interval.as_millis())
                .unwrap_or(u64::MAX),
            enqueued: m.enqueued.load(Ordering::Relaxed),
            flushed: m.flushed.load(Ordering::Relaxed),
            dropped: m.dropped.load(Ordering::Relaxed),
            failed_flushes: m.failed_flushes.load(Ordering::Relaxed),
            rejected: m.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WriteBehindQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
        let pending = self.shared.pending_len();
        if pending > 0 {
            warn!(pending, "audit queue dropped without drain, pending events lost");
        }
    }
}

/// Background loop serving both the timer and the size trigger.
async fn run_worker(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = shared.flush_now.notified() => {
                // A flush already in flight does not consume the trigger.
                while shared.pending_len() >= shared.config.batch_size {
                    if shared.flush_waiting().await == FlushOutcome::Idle {
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                shared.flush().await;
            }
        }
    }
    debug!("audit queue worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::RecordingStore;

    fn event(n: usize) -> AuditEvent {
        AuditEvent::new("TICKET", format!("t-{n}"), "UPDATE", "u-1", "USER")
    }

    fn queue_with(store: &Arc<RecordingStore>, batch_size: usize) -> WriteBehindQueue {
        let writer = BatchWriter::new(Arc::clone(store) as Arc<dyn crate::AuditStore>);
        WriteBehindQueue::new(
            writer,
            QueueConfig {
                batch_size,
                flush_interval: Duration::from_millis(5000),
                max_pending: 10_000,
            },
        )
        .unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn size_trigger_flushes_exactly_one_full_batch() {
        let store = Arc::new(RecordingStore::new());
        let queue = queue_with(&store, 50);

        for i in 0..50 {
            queue.enqueue(event(i)).unwrap();
        }
        settle().await;

        assert_eq!(store.batches(), vec![50]);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn below_batch_size_waits_for_timer() {
        let store = Arc::new(RecordingStore::new());
        let queue = queue_with(&store, 50);

        for i in 0..7 {
            queue.enqueue(event(i)).unwrap();
        }
        settle().await;
        assert!(store.batches().is_empty());
        assert_eq!(queue.size(), 7);

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(store.batches(), vec![7]);
        assert_eq!(queue.size(), 0);

        // An empty buffer does not produce further store calls.
        tokio::time::sleep(Duration::from_millis(15_000)).await;
        assert_eq!(store.batches(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_120_flushes_two_full_batches_then_remainder_on_timer() {
        let store = Arc::new(RecordingStore::new());
        let queue = queue_with(&store, 50);

        for i in 0..120 {
            queue.enqueue(event(i)).unwrap();
        }
        settle().await;
        assert_eq!(store.batches(), vec![50, 50]);
        assert_eq!(queue.size(), 20);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(store.batches(), vec![50, 50, 20]);
        assert_eq!(queue.size(), 0);
        assert_eq!(store.len(), 120);

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 120);
        assert_eq!(stats.flushed, 120);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_preserves_order_within_batch() {
        let store = Arc::new(RecordingStore::new());
        let queue = queue_with(&store, 10);

        for i in 0..10 {
            queue.enqueue(event(i)).unwrap();
        }
        settle().await;

        let ids: Vec<String> = store
            .records
            .lock()
            .iter()
            .map(|r| r.entity_id.clone())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("t-{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn size_trigger_survives_concurrent_manual_flush() {
        let store = Arc::new(RecordingStore::with_insert_delay(Duration::from_millis(100)));
        let queue = Arc::new(queue_with(&store, 5));

        queue.enqueue(event(0)).unwrap();
        let manual = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.flush().await })
        };
        settle().await;
        assert!(queue.is_flushing());

        // Reaches the batch size while the manual flush holds the flag.
        for i in 1..6 {
            queue.enqueue(event(i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(
            manual.await.unwrap(),
            FlushOutcome::Written {
                events: 1,
                inserted: 1
            }
        );
        assert_eq!(store.batches(), vec![1, 5]);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_flush_in_flight() {
        let store = Arc::new(RecordingStore::with_insert_delay(Duration::from_millis(100)));
        let queue = Arc::new(queue_with(&store, 50));

        for i in 0..3 {
            queue.enqueue(event(i)).unwrap();
        }
        let manual = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.flush().await })
        };
        settle().await;
        queue.enqueue(event(3)).unwrap();
        queue.enqueue(event(4)).unwrap();

        queue.drain().await;
        assert!(!queue.is_flushing());
        assert_eq!(store.batches(), vec![3, 2]);
        assert_eq!(store.len(), 5);
        manual.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_with_empty_list_still_waits_for_last_batch() {
        let store = Arc::new(RecordingStore::with_insert_delay(Duration::from_millis(100)));
        let queue = Arc::new(queue_with(&store, 50));

        for i in 0..3 {
            queue.enqueue(event(i)).unwrap();
        }
        let manual = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.flush().await })
        };
        settle().await;
        assert_eq!(queue.size(), 0);

        queue.drain().await;
        assert!(!queue.is_flushing());
        assert_eq!(store.len(), 3);
        manual.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_flush_is_bounded_by_batch_size() {
        let store = Arc::new(RecordingStore::new());
        let queue = queue_with(&store, 50);
        // Fill without letting the worker run in between.
        for i in 0..49 {
            queue.enqueue(event(i)).unwrap();
        }

        assert_eq!(
            queue.flush().await,
            FlushOutcome::Written {
                events: 49,
                inserted: 49
            }
        );
        assert_eq!(queue.flush().await, FlushOutcome::Idle);
        assert!(store.batches().iter().all(|&n| n <= 50));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_drops_batch_and_keeps_going() {
        let store = Arc::new(RecordingStore::new());
        let queue = queue_with(&store, 5);
        store.fail_inserts.store(true, Ordering::SeqCst);

        for i in 0..5 {
            queue.enqueue(event(i)).unwrap();
        }
        settle().await;
        assert_eq!(queue.size(), 0);
        assert_eq!(store.len(), 0);

        let stats = queue.stats();
        assert_eq!(stats.dropped, 5);
        assert_eq!(stats.failed_flushes, 1);
        assert!(!stats.flushing);

        store.fail_inserts.store(false, Ordering::SeqCst);
        for i in 5..10 {
            queue.enqueue(event(i)).unwrap();
        }
        settle().await;
        assert_eq!(store.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn single_flusher_under_concurrent_load() {
        let store = Arc::new(RecordingStore::with_insert_delay(Duration::from_millis(50)));
        let queue = Arc::new(queue_with(&store, 10));

        let mut producers = Vec::new();
        for p in 0..8 {
            let queue = Arc::clone(&queue);
            producers.push(tokio::spawn(async move {
                for i in 0..40 {
                    queue.enqueue(event(p * 100 + i)).unwrap();
                    if i % 7 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        let mut flushers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            flushers.push(tokio::spawn(async move {
                for _ in 0..20 {
                    queue.flush().await;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }));
        }
        for handle in producers.into_iter().chain(flushers) {
            handle.await.unwrap();
        }
        queue.drain().await;

        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 320);
        assert!(store.batches().iter().all(|&n| n <= 10));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_empties_buffer_and_stops_timer() {
        let store = Arc::new(RecordingStore::new());
        let queue = queue_with(&store, 50);

        for i in 0..123 {
            queue.enqueue(event(i)).unwrap();
        }
        queue.drain().await;

        assert_eq!(queue.size(), 0);
        assert_eq!(store.len(), 123);
        assert!(store.batches().iter().all(|&n| n <= 50));
        let calls = store.batches().len();

        // Timer no longer fires and the queue refuses new work.
        let rejected = queue.enqueue(event(999)).unwrap_err();
        assert!(matches!(rejected, EnqueueError::Closed(_)));
        assert_eq!(rejected.into_event().entity_id, "t-999");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.batches().len(), calls);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn soft_cap_hands_event_back() {
        let store = Arc::new(RecordingStore::new());
        let writer = BatchWriter::new(Arc::clone(&store) as Arc<dyn crate::AuditStore>);
        let queue = WriteBehindQueue::new(
            writer,
            QueueConfig {
                batch_size: 2,
                flush_interval: Duration::from_secs(5),
                max_pending: 3,
            },
        )
        .unwrap();

        for i in 0..3 {
            queue.enqueue(event(i)).unwrap();
        }
        let err = queue.enqueue(event(3)).unwrap_err();
        assert!(matches!(err, EnqueueError::Full { pending: 3, .. }));
        assert_eq!(queue.stats().rejected, 1);
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let store: Arc<dyn crate::AuditStore> = Arc::new(RecordingStore::new());
        let bad = QueueConfig {
            batch_size: 0,
            ..QueueConfig::default()
        };
        assert!(WriteBehindQueue::new(BatchWriter::new(Arc::clone(&store)), bad).is_err());

        let bad = QueueConfig {
            flush_interval: Duration::ZERO,
            ..QueueConfig::default()
        };
        assert!(WriteBehindQueue::new(BatchWriter::new(store), bad).is_err());
    }
}
