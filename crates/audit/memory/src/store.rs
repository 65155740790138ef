use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use jejak_audit::error::AuditError;
use jejak_audit::record::{AuditPage, AuditQuery, AuditRecord, StoreStats};
use jejak_audit::store::AuditStore;

/// In-memory audit store using `DashMap`. Suitable for development and testing.
///
/// Records are stored in a concurrent hash map keyed by record ID, with a
/// secondary index from `(entity_type, entity_id)` to record IDs.
pub struct MemoryAuditStore {
    /// Primary store: record ID -> `AuditRecord`.
    records: DashMap<String, AuditRecord>,
    /// Secondary index: entity key -> list of record IDs.
    entity_index: DashMap<(String, String), Vec<String>>,
}

impl MemoryAuditStore {
    /// Create a new empty in-memory audit store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            entity_index: DashMap::new(),
        }
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn remove(&self, id: &str) -> bool {
        let Some((_, rec)) = self.records.remove(id) else {
            return false;
        };
        let key = (rec.entity_type, rec.entity_id);
        if let Some(mut ids) = self.entity_index.get_mut(&key) {
            ids.retain(|i| i != id);
        }
        self.entity_index.remove_if(&key, |_, ids| ids.is_empty());
        true
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert_batch(&self, records: &[AuditRecord]) -> Result<u64, AuditError> {
        let mut inserted = 0u64;
        for rec in records {
            // Existing ids are left untouched.
            if let Entry::Vacant(slot) = self.records.entry(rec.id.clone()) {
                slot.insert(rec.clone());
                self.entity_index
                    .entry((rec.entity_type.clone(), rec.entity_id.clone()))
                    .or_default()
                    .push(rec.id.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<AuditRecord>, AuditError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditError> {
        let limit = query.effective_limit();
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);

        let mut matching: Vec<AuditRecord> = self
            .records
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        // Newest first; id breaks ties between records from different writers.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let records: Vec<AuditRecord> = matching
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Ok(AuditPage {
            records,
            total,
            page: query.effective_page(),
            limit,
        })
    }

    async fn entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: u32,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let key = (entity_type.to_owned(), entity_id.to_owned());
        let Some(ids) = self.entity_index.get(&key) else {
            return Ok(Vec::new());
        };
        let mut history: Vec<AuditRecord> = ids
            .value()
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.value().clone()))
            .collect();
        drop(ids);

        history.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        history.truncate(limit as usize);
        Ok(history)
    }

    async fn count_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().created_at < cutoff)
            .count() as u64)
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, AuditError> {
        // Collect IDs to remove (cannot mutate while iterating DashMap).
        let mut victims: Vec<(DateTime<Utc>, String)> = self
            .records
            .iter()
            .filter(|entry| entry.value().created_at < cutoff)
            .map(|entry| (entry.value().created_at, entry.key().clone()))
            .collect();
        victims.sort();
        victims.truncate(limit as usize);

        let mut removed = 0u64;
        for (_, id) in victims {
            if self.remove(&id) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats, AuditError> {
        let mut stats = StoreStats::default();
        for entry in &self.records {
            let created_at = entry.value().created_at;
            stats.total += 1;
            if created_at < cutoff {
                stats.eligible += 1;
            }
            stats.oldest = Some(stats.oldest.map_or(created_at, |o| o.min(created_at)));
            stats.newest = Some(stats.newest.map_or(created_at, |n| n.max(created_at)));
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use jejak_audit::event::AuditEvent;
    use jejak_audit::record::{AuditQuery, AuditRecord};
    use jejak_audit::store::AuditStore;

    use super::MemoryAuditStore;

    fn make_record(id: &str, entity_id: &str) -> AuditRecord {
        let event = AuditEvent::new("TICKET", entity_id, "UPDATE", "u-1", "USER")
            .metadata(&serde_json::json!({"source": "test"}));
        AuditRecord::from_event(event, id.to_owned(), Utc::now())
    }

    #[tokio::test]
    async fn insert_and_get_by_id() {
        let store = MemoryAuditStore::new();
        let rec = make_record("r1", "t1");
        store.insert(rec.clone()).await.unwrap();

        let found = store.get_by_id("r1").await.unwrap();
        assert_eq!(found, Some(rec));
    }

    #[tokio::test]
    async fn duplicate_ids_are_skipped() {
        let store = MemoryAuditStore::new();
        let mut first = make_record("r1", "t1");
        first.action = "CREATE".to_owned();
        store.insert(first).await.unwrap();

        let batch = vec![make_record("r1", "t1"), make_record("r2", "t1")];
        assert_eq!(store.insert_batch(&batch).await.unwrap(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_by_id("r1").await.unwrap().unwrap().action, "CREATE");
    }

    #[tokio::test]
    async fn query_with_filters() {
        let store = MemoryAuditStore::new();
        let r1 = make_record("r1", "t1");
        let mut r2 = make_record("r2", "b1");
        r2.entity_type = "BANK".to_owned();
        store.insert_batch(&[r1, r2]).await.unwrap();

        let q = AuditQuery {
            entity_type: Some("BANK".to_owned()),
            ..Default::default()
        };
        let page = store.query(&q).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].id, "r2");
    }

    #[tokio::test]
    async fn query_pagination() {
        let store = MemoryAuditStore::new();
        for i in 0..10 {
            let mut rec = make_record(&format!("r{i}"), "t1");
            rec.created_at = Utc::now() + Duration::seconds(i64::from(i));
            store.insert(rec).await.unwrap();
        }

        let q = AuditQuery {
            limit: Some(3),
            page: Some(2),
            ..Default::default()
        };
        let page = store.query(&q).await.unwrap();
        assert_eq!(page.total, 10);
        assert_eq!(page.limit, 3);
        assert_eq!(page.page, 2);
        let ids: Vec<&str> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r6", "r5", "r4"]);
    }

    #[tokio::test]
    async fn query_time_range() {
        let store = MemoryAuditStore::new();
        let now = Utc::now();

        let mut r1 = make_record("r1", "t1");
        r1.created_at = now - Duration::hours(2);
        let mut r2 = make_record("r2", "t2");
        r2.created_at = now;
        store.insert_batch(&[r1, r2]).await.unwrap();

        let q = AuditQuery {
            from: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        let page = store.query(&q).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].id, "r2");
    }

    #[tokio::test]
    async fn entity_history_newest_first_with_limit() {
        let store = MemoryAuditStore::new();
        let now = Utc::now();
        for i in 0..5 {
            let mut rec = make_record(&format!("r{i}"), "t1");
            rec.created_at = now + Duration::seconds(i);
            store.insert(rec).await.unwrap();
        }
        store.insert(make_record("other", "t2")).await.unwrap();

        let history = store.entity_history("TICKET", "t1", 3).await.unwrap();
        let ids: Vec<&str> = history.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r3", "r2"]);
        assert!(store.entity_history("TICKET", "none", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_older_than_respects_limit_and_cutoff() {
        let store = MemoryAuditStore::new();
        let now = Utc::now();
        for i in 0..5 {
            let mut rec = make_record(&format!("old{i}"), "t1");
            rec.created_at = now - Duration::days(800 + i);
            store.insert(rec).await.unwrap();
        }
        store.insert(make_record("fresh", "t1")).await.unwrap();
        let cutoff = now - Duration::days(730);

        assert_eq!(store.count_older_than(cutoff).await.unwrap(), 5);
        assert_eq!(store.delete_older_than(cutoff, 3).await.unwrap(), 3);
        // Oldest go first.
        assert!(store.get_by_id("old4").await.unwrap().is_none());
        assert!(store.get_by_id("old0").await.unwrap().is_some());
        assert_eq!(store.delete_older_than(cutoff, 3).await.unwrap(), 2);
        assert_eq!(store.delete_older_than(cutoff, 3).await.unwrap(), 0);

        assert_eq!(store.len(), 1);
        let history = store.entity_history("TICKET", "t1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "fresh");
    }

    #[tokio::test]
    async fn stats_over_records() {
        let store = MemoryAuditStore::new();
        let now = Utc::now();
        assert_eq!(store.stats(now).await.unwrap().total, 0);

        let mut old = make_record("old", "t1");
        old.created_at = now - Duration::days(1000);
        let mut new = make_record("new", "t1");
        new.created_at = now;
        store.insert_batch(&[old, new]).await.unwrap();

        let stats = store.stats(now - Duration::days(730)).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.eligible, 1);
        assert_eq!(stats.oldest, Some(now - Duration::days(1000)));
        assert_eq!(stats.newest, Some(now));
    }

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let store = MemoryAuditStore::new();
        assert!(store.get_by_id("nope").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
