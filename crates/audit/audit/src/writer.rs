use std::sync::Arc;

use tracing::debug;

use crate::clock::MonotonicClock;
use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::record::AuditRecord;
use crate::store::AuditStore;

/// Turns audit events into records and writes them to a store in one call.
///
/// The writer owns id and timestamp assignment: every record gets a fresh
/// UUID v7 and a `created_at` from a shared [`MonotonicClock`], so insertion
/// order within this process is reflected in `created_at`.
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn AuditStore>,
    clock: Arc<MonotonicClock>,
}

impl BatchWriter {
    /// Create a writer for the given store.
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Convert events into records, preserving their order.
    pub fn to_records(&self, events: Vec<AuditEvent>) -> Vec<AuditRecord> {
        events
            .into_iter()
            .map(|event| {
                let id = uuid::Uuid::now_v7().to_string();
                AuditRecord::from_event(event, id, self.clock.now())
            })
            .collect()
    }

    /// Write a batch of events with a single bulk insert.
    ///
    /// Duplicate-key rejections count as success with nothing inserted. Any
    /// other store error is returned to the caller.
    pub async fn insert_batch(&self, events: Vec<AuditEvent>) -> Result<u64, AuditError> {
        if events.is_empty() {
            return Ok(0);
        }
        let records = self.to_records(events);
        self.write_records(&records).await
    }

    /// Write one event through the same path as a batch.
    pub async fn insert_one(&self, event: AuditEvent) -> Result<u64, AuditError> {
        self.insert_batch(vec![event]).await
    }

    /// Write already-built records, absorbing duplicate-key rejections.
    pub async fn write_records(&self, records: &[AuditRecord]) -> Result<u64, AuditError> {
        match self.store.insert_batch(records).await {
            Ok(inserted) => {
                let skipped = records.len() as u64 - inserted.min(records.len() as u64);
                if skipped > 0 {
                    debug!(inserted, skipped, "skipped duplicate audit records");
                }
                Ok(inserted)
            }
            Err(AuditError::DuplicateKey(detail)) => {
                debug!(batch = records.len(), %detail, "audit batch rejected as duplicate, skipping");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::record::{AuditPage, AuditQuery, StoreStats};
    use crate::testing::RecordingStore;

    fn event(n: usize) -> AuditEvent {
        AuditEvent::new("TICKET", format!("t-{n}"), "CREATE", "u-1", "USER")
    }

    #[tokio::test]
    async fn writes_batch_in_order_with_increasing_timestamps() {
        let store = Arc::new(RecordingStore::new());
        let writer = BatchWriter::new(store.clone());

        let inserted = writer
            .insert_batch((0..5).map(event).collect())
            .await
            .unwrap();
        assert_eq!(inserted, 5);
        assert_eq!(store.batches(), vec![5]);

        let records = store.records.lock().clone();
        let ids: Vec<&str> = records.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["t-0", "t-1", "t-2", "t-3", "t-4"]);
        assert!(records.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test]
    async fn empty_batch_does_not_touch_store() {
        let store = Arc::new(RecordingStore::new());
        let writer = BatchWriter::new(store.clone());
        assert_eq!(writer.insert_batch(Vec::new()).await.unwrap(), 0);
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn duplicate_records_are_skipped() {
        let store = Arc::new(RecordingStore::new());
        let writer = BatchWriter::new(store.clone());
        let records = writer.to_records(vec![event(1), event(2)]);

        assert_eq!(writer.write_records(&records).await.unwrap(), 2);
        assert_eq!(writer.write_records(&records).await.unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn storage_errors_propagate() {
        let store = Arc::new(RecordingStore::new());
        store.fail_inserts.store(true, Ordering::SeqCst);
        let writer = BatchWriter::new(store);
        let err = writer.insert_one(event(1)).await.unwrap_err();
        assert!(matches!(err, AuditError::Storage(_)));
    }

    struct RejectingStore;

    #[async_trait]
    impl AuditStore for RejectingStore {
        async fn insert_batch(&self, _: &[AuditRecord]) -> Result<u64, AuditError> {
            Err(AuditError::DuplicateKey("id".into()))
        }
        async fn get_by_id(&self, _: &str) -> Result<Option<AuditRecord>, AuditError> {
            Ok(None)
        }
        async fn query(&self, q: &AuditQuery) -> Result<AuditPage, AuditError> {
            Ok(AuditPage {
                records: Vec::new(),
                total: 0,
                page: q.effective_page(),
                limit: q.effective_limit(),
            })
        }
        async fn entity_history(
            &self,
            _: &str,
            _: &str,
            _: u32,
        ) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(Vec::new())
        }
        async fn count_older_than(&self, _: DateTime<Utc>) -> Result<u64, AuditError> {
            Ok(0)
        }
        async fn delete_older_than(&self, _: DateTime<Utc>, _: u32) -> Result<u64, AuditError> {
            Ok(0)
        }
        async fn stats(&self, _: DateTime<Utc>) -> Result<StoreStats, AuditError> {
            Ok(StoreStats::default())
        }
    }

    #[tokio::test]
    async fn duplicate_key_error_is_not_fatal() {
        let writer = BatchWriter::new(Arc::new(RejectingStore));
        assert_eq!(writer.insert_one(event(1)).await.unwrap(), 0);
    }
}
