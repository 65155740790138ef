use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::event::AuditEvent;

/// The durable, persisted form of an audit event.
///
/// Structured fields are stored as serialized JSON text so that backends do
/// not need to understand their schema. Records are immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique identifier for this audit record (UUID v7).
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

    // -- Serialized structured columns --
    /// Entity state before the action.
    pub before_value: Option<String>,
    /// Entity state after the action.
    pub after_value: Option<String>,
    /// Per-field `{from, to}` changes.
    pub delta: Option<String>,
    /// Contextual metadata.
    pub metadata: Option<String>,

    // -- Origin --
    /// Caller network address.
    pub origin_address: Option<String>,
    /// Caller client identity.
    pub origin_client: Option<String>,

    /// Server-assigned creation time; the authoritative ordering key.
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Build the persisted form of `event` with the given id and timestamp.
    ///
    /// A structured field that fails to serialize is logged and stored as
    /// `None`; the rest of the record is kept.
    pub fn from_event(event: AuditEvent, id: String, created_at: DateTime<Utc>) -> Self {
        let before_value = codec::encode_field(&id, "before_value", event.before_value.as_ref());
        let after_value = codec::encode_field(&id, "after_value", event.after_value.as_ref());
        let delta = codec::encode_field(&id, "delta", event.delta.as_ref());
        let metadata = codec::encode_field(&id, "metadata", event.metadata.as_ref());
        let (origin_address, origin_client) = match event.origin {
            Some(origin) => (origin.address, origin.client),
            None => (None, None),
        };

        Self {
            id,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            action: event.action,
            actor_id: event.actor_id,
            actor_type: event.actor_type,
            before_value,
            after_value,
            delta,
            metadata,
            origin_address,
            origin_client,
            created_at,
        }
    }
}

/// Filters and pagination for listing audit records.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Filter by entity type.
    pub entity_type: Option<String>,
    /// Filter by entity id.
    pub entity_id: Option<String>,
    /// Filter by action.
    pub action: Option<String>,
    /// Filter by actor id.
    pub actor_id: Option<String>,
    /// Filter by actor type.
    pub actor_type: Option<String>,
    /// Only records created at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only records created at or before this time.
    pub to: Option<DateTime<Utc>>,
    /// 1-based page number (default 1).
    pub page: Option<u32>,
    /// Page size (default 20, max 100).
    pub limit: Option<u32>,
}

impl AuditQuery {
    /// Default page size.
    pub const DEFAULT_LIMIT: u32 = 20;
    /// Largest page size a caller may request.
    pub const MAX_LIMIT: u32 = 100;

    /// Return the effective limit, clamped to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    /// Return the effective 1-based page number.
    pub fn effective_page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Number of records to skip for the effective page.
    pub fn offset(&self) -> u64 {
        u64::from(self.effective_page() - 1) * u64::from(self.effective_limit())
    }

    /// Check whether `record` satisfies every filter in this query.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        matches_filter(self.entity_type.as_ref(), &record.entity_type)
            && matches_filter(self.entity_id.as_ref(), &record.entity_id)
            && matches_filter(self.action.as_ref(), &record.action)
            && matches_filter(self.actor_id.as_ref(), &record.actor_id)
            && matches_filter(self.actor_type.as_ref(), &record.actor_type)
            && self.from.is_none_or(|from| record.created_at >= from)
            && self.to.is_none_or(|to| record.created_at <= to)
    }
}

/// Check if a filter matches a value. `None` filter matches everything.
fn matches_filter(filter: Option<&String>, value: &str) -> bool {
    filter.is_none_or(|f| f == value)
}

/// A page of raw records returned by a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPage {
    /// Records on this page, newest first.
    pub records: Vec<AuditRecord>,
    /// Total number of records matching the query (before pagination).
    pub total: u64,
    /// The page number used.
    pub page: u32,
    /// The limit used.
    pub limit: u32,
}

/// Aggregate figures over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Total number of records.
    pub total: u64,
    /// Creation time of the oldest record.
    pub oldest: Option<DateTime<Utc>>,
    /// Creation time of the newest record.
    pub newest: Option<DateTime<Utc>>,
    /// Records strictly older than the supplied cutoff.
    pub eligible: u64,
}
