/// Errors that can occur during audit store and pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// An error from the underlying storage backend.
    #[error("storage error: {0}")]
    Storage(String),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend rejected a write because a record with the same id exists.
    ///
    /// The batch writer treats this as a successful no-op.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// A pipeline component was configured with an unusable value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
