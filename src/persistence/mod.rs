//! Contract for durable recovery records, plus the in-memory and relational
//! backends that implement it. All operations may suspend the caller; none
//! may shadow the outcome of the wrapped operation (see the engine's
//! failure-semantics handling in `wrapper.rs`).

mod memory;
mod sql;

pub use memory::InMemoryStore;
pub use sql::SqlitePersistence;

use crate::types::{AttemptRecord, ErrorLogEntry, OperationState, RecoveryRecord};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Durable storage for recovery records and their subordinate attempt and
/// error-log entries. Implementations own their own locking; the engine
/// never holds a circuit-breaker lock across a call into this trait.
#[async_trait]
pub trait RecoveryStore: Send + Sync {
    async fn save(&self, record: &RecoveryRecord) -> PersistenceResult<()>;

    async fn load(&self, operation_id: &str) -> PersistenceResult<Option<RecoveryRecord>>;

    /// Idempotent; cascades to subordinate attempt and error-log entries.
    async fn delete(&self, operation_id: &str) -> PersistenceResult<()>;

    /// Ordered by `updated_at` descending.
    async fn list_by_state(&self, state: OperationState) -> PersistenceResult<Vec<RecoveryRecord>>;

    async fn list_keys(&self) -> PersistenceResult<Vec<String>>;

    async fn clear(&self) -> PersistenceResult<()>;

    /// Deletes records whose `updated_at` is strictly older than `max_age_days`,
    /// cascading to their subordinate entries. Returns the number removed.
    async fn cleanup_old_states(&self, max_age_days: i64) -> PersistenceResult<u64>;

    async fn save_attempt(&self, attempt: &AttemptRecord) -> PersistenceResult<()>;

    async fn save_error_log(&self, entry: &ErrorLogEntry) -> PersistenceResult<()>;

    /// Subordinate attempt records for a given operation id, in the order
    /// they were written.
    async fn list_attempts(&self, operation_id: &str) -> PersistenceResult<Vec<AttemptRecord>>;

    /// Subordinate error-log entries for a given operation id, in the order
    /// they were written.
    async fn list_error_logs(&self, operation_id: &str) -> PersistenceResult<Vec<ErrorLogEntry>>;
}
