//! The transient input to the audit pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single per-field change inside an event's `delta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Value before the change.
    pub from: serde_json::Value,
    /// Value after the change.
    pub to: serde_json::Value,
}

impl FieldChange {
    /// Create a change from two already-serialized values.
    pub fn new(from: serde_json::Value, to: serde_json::Value) -> Self {
        Self { from, to }
    }
}

/// Request metadata describing where an action originated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Caller network address.
    #[serde(default)]
    pub address: Option<String>,
    /// Client identity string (e.g. a user agent).
    #[serde(default)]
    pub client: Option<String>,
}

/// Description of one state-changing action submitted for recording.
///
/// Business code constructs an event with [`AuditEvent::new`] and attaches
/// optional snapshots with the builder methods. Snapshot builders accept any
/// `Serialize` value; a value that cannot be represented as JSON is logged and
/// omitted so that building an event can never fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Kind of business entity affected (e.g. `TICKET`).
    pub entity_type: String,
    /// Identifier of the affected entity instance.
    pub entity_id: String,
    /// Operation tag (e.g. `CREATE`, `STATUS_CHANGE`).
    pub action: String,
    /// Identity of whoever performed the action.
    pub actor_id: String,
    /// Category of the actor. Opaque to the pipeline.
    pub actor_type: String,
    /// Entity state before the action.
    #[serde(default)]
    pub before_value: Option<serde_json::Value>,
    /// Entity state after the action.
    #[serde(default)]
    pub after_value: Option<serde_json::Value>,
    /// Precomputed per-field changes.
    #[serde(default)]
    pub delta: Option<BTreeMap<String, FieldChange>>,
    /// Free-form contextual data.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Request origin.
    #[serde(default)]
    pub origin: Option<Origin>,
}

impl AuditEvent {
    /// Create an event with the required identifying fields.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        actor_id: impl Into<String>,
        actor_type: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            actor_id: actor_id.into(),
            actor_type: actor_type.into(),
            before_value: None,
            after_value: None,
            delta: None,
            metadata: None,
            origin: None,
        }
    }

    /// Attach the entity state before the action.
    #[must_use]
    pub fn before<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.before_value = snapshot("before_value", value);
        self
    }

    /// Attach the entity state after the action.
    #[must_use]
    pub fn after<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.after_value = snapshot("after_value", value);
        self
    }

    /// Attach contextual metadata.
    #[must_use]
    pub fn metadata<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.metadata = snapshot("metadata", value);
        self
    }

    /// Record a single field change in the delta map.
    #[must_use]
    pub fn change<A, B>(mut self, field: impl Into<String>, from: &A, to: &B) -> Self
    where
        A: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let field = field.into();
        let (Some(from), Some(to)) = (snapshot(&field, from), snapshot(&field, to)) else {
            return self;
        };
        self.delta
            .get_or_insert_with(BTreeMap::new)
            .insert(field, FieldChange::new(from, to));
        self
    }

    /// Replace the delta map wholesale.
    #[must_use]
    pub fn with_delta(mut self, delta: BTreeMap<String, FieldChange>) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Attach request origin metadata.
    #[must_use]
    pub fn origin(mut self, address: Option<String>, client: Option<String>) -> Self {
        self.origin = if address.is_none() && client.is_none() {
            None
        } else {
            Some(Origin { address, client })
        };
        self
    }

    /// Caller network address, if known.
    pub fn origin_address(&self) -> Option<&str> {
        self.origin.as_ref().and_then(|o| o.address.as_deref())
    }

    /// Caller client identity, if known.
    pub fn origin_client(&self) -> Option<&str> {
        self.origin.as_ref().and_then(|o| o.client.as_deref())
    }
}

fn snapshot<T: Serialize + ?Sized>(field: &str, value: &T) -> Option<serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(field, error = %e, "audit snapshot is not serializable, omitting");
            None
        }
    }
}
