use super::{PersistenceResult, RecoveryStore};
use crate::types::{AttemptRecord, ErrorLogEntry, OperationState, RecoveryRecord};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<String, RecoveryRecord>,
    attempts: HashMap<String, Vec<AttemptRecord>>,
    error_logs: HashMap<String, Vec<ErrorLogEntry>>,
}

/// Fast in-process recovery store. Default backend, and the one used by the
/// crate's own test suite. Visible-to-subsequent-loads durability is
/// provided by the `RwLock`, not by any actual disk write.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecoveryStore for InMemoryStore {
    async fn save(&self, record: &RecoveryRecord) -> PersistenceResult<()> {
        let mut tables = self.tables.write().await;
        tables.records.insert(record.operation_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, operation_id: &str) -> PersistenceResult<Option<RecoveryRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.records.get(operation_id).cloned())
    }

    async fn delete(&self, operation_id: &str) -> PersistenceResult<()> {
        let mut tables = self.tables.write().await;
        tables.records.remove(operation_id);
        tables.attempts.remove(operation_id);
        tables.error_logs.remove(operation_id);
        Ok(())
    }

    async fn list_by_state(&self, state: OperationState) -> PersistenceResult<Vec<RecoveryRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<RecoveryRecord> = tables
            .records
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn list_keys(&self) -> PersistenceResult<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(tables.records.keys().cloned().collect())
    }

    async fn clear(&self) -> PersistenceResult<()> {
        let mut tables = self.tables.write().await;
        tables.records.clear();
        tables.attempts.clear();
        tables.error_logs.clear();
        Ok(())
    }

    async fn cleanup_old_states(&self, max_age_days: i64) -> PersistenceResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(max_age_days);
        let mut tables = self.tables.write().await;
        let stale: Vec<String> = tables
            .records
            .values()
            .filter(|r| r.updated_at < cutoff)
            .map(|r| r.operation_id.clone())
            .collect();

        for operation_id in &stale {
            tables.records.remove(operation_id);
            tables.attempts.remove(operation_id);
            tables.error_logs.remove(operation_id);
        }

        Ok(stale.len() as u64)
    }

    async fn save_attempt(&self, attempt: &AttemptRecord) -> PersistenceResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .attempts
            .entry(attempt.operation_id.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn save_error_log(&self, entry: &ErrorLogEntry) -> PersistenceResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .error_logs
            .entry(entry.operation_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_attempts(&self, operation_id: &str) -> PersistenceResult<Vec<AttemptRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.attempts.get(operation_id).cloned().unwrap_or_default())
    }

    async fn list_error_logs(&self, operation_id: &str) -> PersistenceResult<Vec<ErrorLogEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.error_logs.get(operation_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_record(id: &str) -> RecoveryRecord {
        RecoveryRecord::new(id, "example::op")
    }

    #[tokio::test]
    async fn save_then_load_round_trips_all_fields() {
        let store = InMemoryStore::new();
        let mut record = sample_record("op-1");
        record.attempt = 2;
        record.state = OperationState::Recovering;
        record.metadata.insert("k".into(), serde_json::json!("v"));

        store.save(&record).await.unwrap();
        let loaded = store.load("op-1").await.unwrap().unwrap();

        assert_eq!(loaded.operation_id, record.operation_id);
        assert_eq!(loaded.attempt, record.attempt);
        assert_eq!(loaded.state, record.state);
        assert_eq!(loaded.metadata, record.metadata);
    }

    #[tokio::test]
    async fn delete_cascades_to_attempts_and_error_logs() {
        let store = InMemoryStore::new();
        let record = sample_record("op-2");
        store.save(&record).await.unwrap();
        store
            .save_attempt(&AttemptRecord::start("op-2", 1, "fixed", Duration::ZERO))
            .await
            .unwrap();
        store
            .save_error_log(&ErrorLogEntry {
                operation_id: "op-2".into(),
                category: crate::types::ErrorCategory::Network,
                subcategory: None,
                severity: crate::types::Severity::Medium,
                error: crate::types::ErrorSnapshot::new("Err", "boom"),
                function_name: "example::op".into(),
                attempt_number: 1,
                strategy_name: "fixed".into(),
                can_recover: true,
                system_info: Default::default(),
                logged_at: Utc::now(),
            })
            .await
            .unwrap();

        store.delete("op-2").await.unwrap();

        assert!(store.load("op-2").await.unwrap().is_none());
        assert!(store.list_attempts("op-2").await.unwrap().is_empty());
        assert!(store.list_error_logs("op-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_only_records_older_than_cutoff() {
        let store = InMemoryStore::new();
        let mut fresh = sample_record("fresh");
        fresh.updated_at = Utc::now();
        let mut stale = sample_record("stale");
        stale.updated_at = Utc::now() - ChronoDuration::days(40);

        store.save(&fresh).await.unwrap();
        store.save(&stale).await.unwrap();

        let removed = store.cleanup_old_states(30).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.load("stale").await.unwrap().is_none());
        assert!(store.load("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_by_state_orders_by_updated_at_descending() {
        let store = InMemoryStore::new();
        let mut older = sample_record("older");
        older.state = OperationState::Failed;
        older.updated_at = Utc::now() - ChronoDuration::seconds(10);
        let mut newer = sample_record("newer");
        newer.state = OperationState::Failed;
        newer.updated_at = Utc::now();

        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();

        let results = store.list_by_state(OperationState::Failed).await.unwrap();
        assert_eq!(results[0].operation_id, "newer");
        assert_eq!(results[1].operation_id, "older");
    }
}
