//! In-crate store double that records every call it receives.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::AuditError;
use crate::record::{AuditPage, AuditQuery, AuditRecord, StoreStats};
use crate::store::AuditStore;

#[derive(Default)]
pub(crate) struct RecordingStore {
    pub records: Mutex<Vec<AuditRecord>>,
    pub insert_calls: Mutex<Vec<usize>>,
    pub delete_calls: Mutex<Vec<u64>>,
    pub fail_inserts: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub insert_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_insert_delay(delay: Duration) -> Self {
        let store = Self::default();
        *store.insert_delay.lock() = Some(delay);
        store
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn batches(&self) -> Vec<usize> {
        self.insert_calls.lock().clone()
    }

    pub fn seed(&self, records: impl IntoIterator<Item = AuditRecord>) {
        self.records.lock().extend(records);
    }
}

#[async_trait]
impl AuditStore for RecordingStore {
    async fn insert_batch(&self, records: &[AuditRecord]) -> Result<u64, AuditError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.insert_calls.lock().push(records.len());

        let delay = *self.insert_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.fail_inserts.load(Ordering::SeqCst) {
            Err(AuditError::Storage("store unreachable".into()))
        } else {
            let mut stored = self.records.lock();
            let mut seen: HashSet<String> = stored.iter().map(|r| r.id.clone()).collect();
            let mut inserted = 0;
            for rec in records {
                if seen.insert(rec.id.clone()) {
                    stored.push(rec.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<AuditRecord>, AuditError> {
        Ok(self.records.lock().iter().find(|r| r.id == id).cloned())
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditError> {
        let mut matching: Vec<AuditRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.effective_limit() as usize)
            .collect();
        Ok(AuditPage {
            records,
            total,
            page: query.effective_page(),
            limit: query.effective_limit(),
        })
    }

    async fn entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: u32,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let mut matching: Vec<AuditRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.entity_type == entity_type && r.entity_id == entity_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn count_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.created_at < cutoff)
            .count() as u64)
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, AuditError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AuditError::Storage("delete failed".into()));
        }
        let mut stored = self.records.lock();
        let mut victims: Vec<(DateTime<Utc>, String)> = stored
            .iter()
            .filter(|r| r.created_at < cutoff)
            .map(|r| (r.created_at, r.id.clone()))
            .collect();
        victims.sort();
        victims.truncate(limit as usize);
        let ids: HashSet<String> = victims.into_iter().map(|(_, id)| id).collect();
        stored.retain(|r| !ids.contains(&r.id));
        let deleted = ids.len() as u64;
        self.delete_calls.lock().push(deleted);
        Ok(deleted)
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats, AuditError> {
        let stored = self.records.lock();
        Ok(StoreStats {
            total: stored.len() as u64,
            oldest: stored.iter().map(|r| r.created_at).min(),
            newest: stored.iter().map(|r| r.created_at).max(),
            eligible: stored.iter().filter(|r| r.created_at < cutoff).count() as u64,
        })
    }
}
