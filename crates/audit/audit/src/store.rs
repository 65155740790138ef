use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AuditError;
use crate::record::{AuditPage, AuditQuery, AuditRecord, StoreStats};

/// Trait for audit record storage backends.
///
/// From the pipeline's perspective the store is append-only: records are
/// inserted in batches and only ever removed by age. Implementations must be
/// `Send + Sync` to be shared across async tasks.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a batch of records in one call.
    ///
    /// Records whose id already exists are skipped rather than failing the
    /// batch. Returns the number of records actually inserted.
    async fn insert_batch(&self, records: &[AuditRecord]) -> Result<u64, AuditError>;

    /// Insert a single record.
    async fn insert(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.insert_batch(std::slice::from_ref(&record)).await?;
        Ok(())
    }

    /// Retrieve an audit record by its unique ID.
    async fn get_by_id(&self, id: &str) -> Result<Option<AuditRecord>, AuditError>;

    /// Query audit records with filters and pagination, newest first.
    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditError>;

    /// Return the most recent `limit` records for one entity, newest first.
    async fn entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: u32,
    ) -> Result<Vec<AuditRecord>, AuditError>;

    /// Count records created strictly before `cutoff`.
    async fn count_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError>;

    /// Delete at most `limit` records created strictly before `cutoff`,
    /// oldest first. Returns the number of records deleted.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>, limit: u32)
    -> Result<u64, AuditError>;

    /// Aggregate statistics, counting records older than `cutoff` as eligible.
    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats, AuditError>;
}
