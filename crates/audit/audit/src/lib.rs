//! Audit trail pipeline: event capture, write-behind batching, retention and queries.

pub mod clock;
pub mod codec;
pub mod error;
pub mod event;
pub mod query;
pub mod queue;
pub mod record;
pub mod recorder;
pub mod retention;
pub mod store;
pub mod writer;

#[cfg(test)]
mod testing;

pub use clock::MonotonicClock;
pub use error::AuditError;
pub use event::{AuditEvent, FieldChange, Origin};
pub use query::{AuditEntry, AuditEntryPage, AuditQueryService};
pub use queue::{EnqueueError, FlushOutcome, QueueConfig, QueueStats, WriteBehindQueue};
pub use record::{AuditPage, AuditQuery, AuditRecord, StoreStats};
pub use recorder::{AuditRecorder, DirectWriteStats};
pub use retention::{PruneReport, RetentionConfig, RetentionPruner, RetentionStats};
pub use store::AuditStore;
pub use writer::BatchWriter;
