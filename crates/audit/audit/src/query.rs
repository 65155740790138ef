//! Read side: decoded audit entries for listing and per-entity history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::codec::decode_field;
use crate::error::AuditError;
use crate::record::{AuditQuery, AuditRecord};
use crate::store::AuditStore;

/// An audit record with its structured fields parsed back into JSON values.
///
/// Fields whose stored text cannot be parsed come back as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Record id.
    pub id: String,
    /// Kind of business entity affected.
    pub entity_type: String,
    /// Identifier of the affected entity instance.
    pub entity_id: String,
    /// Operation tag.
    pub action: String,
    /// Identity of the actor.
    pub actor_id: String,
    /// Category of the actor.
    pub actor_type: String,
    /// Entity state before the action.
    pub before_value: Option<Value>,
    /// Entity state after the action.
    pub after_value: Option<Value>,
    /// Per-field `{from, to}` changes.
    pub delta: Option<Value>,
    /// Contextual metadata.
    pub metadata: Option<Value>,
    /// Caller network address.
    pub origin_address: Option<String>,
    /// Caller client identity.
    pub origin_client: Option<String>,
    /// Server-assigned creation time.
    pub created_at: DateTime<Utc>,
}

impl From<AuditRecord> for AuditEntry {
    fn from(rec: AuditRecord) -> Self {
        let id = rec.id;
        Self {
            before_value: decode_field(&id, "before_value", rec.before_value.as_deref()),
            after_value: decode_field(&id, "after_value", rec.after_value.as_deref()),
            delta: decode_field(&id, "delta", rec.delta.as_deref()),
            metadata: decode_field(&id, "metadata", rec.metadata.as_deref()),
            id,
            entity_type: rec.entity_type,
            entity_id: rec.entity_id,
            action: rec.action,
            actor_id: rec.actor_id,
            actor_type: rec.actor_type,
            origin_address: rec.origin_address,
            origin_client: rec.origin_client,
            created_at: rec.created_at,
        }
    }
}

/// A page of decoded entries.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntryPage {
    /// Entries on this page, newest first.
    pub entries: Vec<AuditEntry>,
    /// Total matching entries across all pages.
    pub total: u64,
    /// The 1-based page number used.
    pub page: u32,
    /// The page size used.
    pub limit: u32,
    /// Number of pages at this page size.
    pub total_pages: u64,
}

/// Query facade over an [`AuditStore`] that returns decoded entries.
#[derive(Clone)]
pub struct AuditQueryService {
    store: Arc<dyn AuditStore>,
}

impl AuditQueryService {
    /// Create a query service over `store`.
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// List entries matching `query`, newest first.
    pub async fn list(&self, query: &AuditQuery) -> Result<AuditEntryPage, AuditError> {
        let page = self.store.query(query).await?;
        let total_pages = page.total.div_ceil(u64::from(page.limit.max(1)));
        Ok(AuditEntryPage {
            entries: page.records.into_iter().map(AuditEntry::from).collect(),
            total: page.total,
            page: page.page,
            limit: page.limit,
            total_pages,
        })
    }

    /// Most recent entries for one entity, newest first.
    ///
    /// `limit` defaults to 20 and is clamped to `1..=100`.
    pub async fn entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        let limit = limit
            .unwrap_or(AuditQuery::DEFAULT_LIMIT)
            .clamp(1, AuditQuery::MAX_LIMIT);
        let records = self
            .store
            .entity_history(entity_type, entity_id, limit)
            .await?;
        Ok(records.into_iter().map(AuditEntry::from).collect())
    }

    /// Fetch one entry by record id.
    pub async fn get(&self, id: &str) -> Result<Option<AuditEntry>, AuditError> {
        Ok(self.store.get_by_id(id).await?.map(AuditEntry::from))
    }
}
