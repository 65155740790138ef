//! Conversion between structured audit fields and their stored text form.

use serde::Serialize;
use tracing::warn;

/// Serialize a structured field to JSON text.
///
/// Returns `None` for an absent field, and also when serialization fails; the
/// failure is logged rather than propagated so a bad snapshot never costs the
/// rest of the record.
pub fn encode_field<T: Serialize + ?Sized>(
    record_id: &str,
    field: &'static str,
    value: Option<&T>,
) -> Option<String> {
    let value = value?;
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(record_id, field, error = %e, "failed to serialize audit field");
            None
        }
    }
}

/// Parse a stored JSON text field back into a value.
///
/// Malformed text yields `None` and a warning; it never fails the read.
pub fn decode_field(
    record_id: &str,
    field: &'static str,
    text: Option<&str>,
) -> Option<serde_json::Value> {
    let text = text?;
    match serde_json::from_str(text) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(record_id, field, error = %e, "failed to deserialize audit field, returning null");
            None
        }
    }
}
