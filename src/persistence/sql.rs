use super::{PersistenceError, PersistenceResult, RecoveryStore};
use crate::types::{
    AttemptRecord, ErrorCategory, ErrorLogEntry, ErrorSnapshot, OperationState, RecoveryRecord,
    Severity,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::OnceCell;

/// Relational persistence backend over a `sqlx` SQLite pool. Mirrors the
/// three-table wire shape in the crate documentation: `recovery_state`,
/// `retry_attempts`, `error_logs`. Queries go through `sqlx::query`/
/// `query_as` builders rather than the `query!` compile-time macros, since
/// this backend targets whatever file the caller points it at rather than a
/// schema fixed at build time.
pub struct SqlitePersistence {
    pool: SqlitePool,
    schema_ready: OnceCell<()>,
}

impl SqlitePersistence {
    /// Connect to (creating if necessary) a SQLite file at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let store = Self {
            pool,
            schema_ready: OnceCell::new(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// The default per-user data directory layout: `~/.<app>/data/recovery.db`.
    pub fn default_path(app_name: &str) -> PersistenceResult<std::path::PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| PersistenceError::Backend("no home directory".into()))?;
        Ok(home.join(format!(".{app_name}")).join("data").join("recovery.db"))
    }

    /// Idempotent schema creation, guarded by a one-shot initializer so
    /// concurrent first calls produce exactly one `CREATE` pass.
    async fn ensure_schema(&self) -> PersistenceResult<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| PersistenceError::Backend(e.to_string()))?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS recovery_state (
                        operation_id TEXT PRIMARY KEY,
                        function_name TEXT NOT NULL,
                        args TEXT NOT NULL,
                        kwargs TEXT NOT NULL,
                        state TEXT NOT NULL,
                        attempt INTEGER NOT NULL,
                        error TEXT,
                        recovery_metadata TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL
                    )
                    "#,
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;

                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_recovery_state_state ON recovery_state(state)",
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_recovery_state_function ON recovery_state(function_name)",
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_recovery_state_updated ON recovery_state(updated_at)",
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS retry_attempts (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        operation_id TEXT NOT NULL REFERENCES recovery_state(operation_id) ON DELETE CASCADE,
                        attempt_number INTEGER NOT NULL,
                        started_at TEXT NOT NULL,
                        completed_at TEXT,
                        duration_ms INTEGER,
                        success INTEGER NOT NULL,
                        error_type TEXT,
                        error_message TEXT,
                        error_traceback TEXT,
                        strategy_name TEXT NOT NULL,
                        delay_seconds REAL NOT NULL,
                        context TEXT NOT NULL
                    )
                    "#,
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_retry_attempts_op ON retry_attempts(operation_id)",
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS error_logs (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        operation_id TEXT NOT NULL REFERENCES recovery_state(operation_id) ON DELETE CASCADE,
                        error_category TEXT NOT NULL,
                        error_subcategory TEXT,
                        severity TEXT NOT NULL,
                        error_type TEXT NOT NULL,
                        error_message TEXT NOT NULL,
                        error_traceback TEXT,
                        function_name TEXT NOT NULL,
                        attempt_number INTEGER NOT NULL,
                        recovery_strategy TEXT NOT NULL,
                        can_recover INTEGER NOT NULL,
                        system_info TEXT NOT NULL,
                        logged_at TEXT NOT NULL
                    )
                    "#,
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_error_logs_op ON error_logs(operation_id)",
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_error_logs_category ON error_logs(error_category)",
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_error_logs_severity ON error_logs(severity)",
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;

                tx.commit()
                    .await
                    .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                Ok::<(), PersistenceError>(())
            })
            .await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> PersistenceResult<RecoveryRecord> {
        let state_str: String = row.try_get("state").map_err(backend_err)?;
        let error_json: Option<String> = row.try_get("error").map_err(backend_err)?;
        let metadata_json: String = row.try_get("recovery_metadata").map_err(backend_err)?;

        Ok(RecoveryRecord {
            operation_id: row.try_get("operation_id").map_err(backend_err)?,
            function_name: row.try_get("function_name").map_err(backend_err)?,
            args: serde_json::from_str(&row.try_get::<String, _>("args").map_err(backend_err)?)?,
            kwargs: serde_json::from_str(&row.try_get::<String, _>("kwargs").map_err(backend_err)?)?,
            state: parse_state(&state_str)?,
            attempt: row.try_get::<i64, _>("attempt").map_err(backend_err)? as u32,
            last_error: error_json.map(|s| serde_json::from_str(&s)).transpose()?,
            metadata: serde_json::from_str(&metadata_json)?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(backend_err)?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(backend_err)?)?,
        })
    }
}

fn backend_err(e: sqlx::Error) -> PersistenceError {
    PersistenceError::Backend(e.to_string())
}

fn parse_state(s: &str) -> PersistenceResult<OperationState> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(PersistenceError::Serialization)
}

fn parse_timestamp(s: &str) -> PersistenceResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Backend(e.to_string()))
}

fn state_to_str(state: OperationState) -> String {
    serde_json::to_value(state)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl RecoveryStore for SqlitePersistence {
    async fn save(&self, record: &RecoveryRecord) -> PersistenceResult<()> {
        self.ensure_schema().await?;
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        sqlx::query(
            r#"
            INSERT INTO recovery_state
                (operation_id, function_name, args, kwargs, state, attempt, error, recovery_metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(operation_id) DO UPDATE SET
                function_name = excluded.function_name,
                args = excluded.args,
                kwargs = excluded.kwargs,
                state = excluded.state,
                attempt = excluded.attempt,
                error = excluded.error,
                recovery_metadata = excluded.recovery_metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.operation_id)
        .bind(&record.function_name)
        .bind(record.args.to_string())
        .bind(record.kwargs.to_string())
        .bind(state_to_str(record.state))
        .bind(record.attempt as i64)
        .bind(record.last_error.as_ref().map(|e| serde_json::to_string(e).unwrap_or_default()))
        .bind(serde_json::to_string(&record.metadata).unwrap_or_default())
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn load(&self, operation_id: &str) -> PersistenceResult<Option<RecoveryRecord>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM recovery_state WHERE operation_id = ?1")
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn delete(&self, operation_id: &str) -> PersistenceResult<()> {
        self.ensure_schema().await?;
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        sqlx::query("DELETE FROM error_logs WHERE operation_id = ?1")
            .bind(operation_id)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        sqlx::query("DELETE FROM retry_attempts WHERE operation_id = ?1")
            .bind(operation_id)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        sqlx::query("DELETE FROM recovery_state WHERE operation_id = ?1")
            .bind(operation_id)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn list_by_state(&self, state: OperationState) -> PersistenceResult<Vec<RecoveryRecord>> {
        self.ensure_schema().await?;
        let rows = sqlx::query("SELECT * FROM recovery_state WHERE state = ?1 ORDER BY updated_at DESC")
            .bind(state_to_str(state))
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_keys(&self) -> PersistenceResult<Vec<String>> {
        self.ensure_schema().await?;
        let rows = sqlx::query("SELECT operation_id FROM recovery_state")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("operation_id").map_err(backend_err))
            .collect()
    }

    async fn clear(&self) -> PersistenceResult<()> {
        self.ensure_schema().await?;
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        sqlx::query("DELETE FROM error_logs").execute(&mut *tx).await.map_err(backend_err)?;
        sqlx::query("DELETE FROM retry_attempts").execute(&mut *tx).await.map_err(backend_err)?;
        sqlx::query("DELETE FROM recovery_state").execute(&mut *tx).await.map_err(backend_err)?;
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn cleanup_old_states(&self, max_age_days: i64) -> PersistenceResult<u64> {
        self.ensure_schema().await?;
        let cutoff = (Utc::now() - ChronoDuration::days(max_age_days)).to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let stale: Vec<String> = sqlx::query("SELECT operation_id FROM recovery_state WHERE updated_at < ?1")
            .bind(&cutoff)
            .fetch_all(&mut *tx)
            .await
            .map_err(backend_err)?
            .iter()
            .map(|r| r.try_get::<String, _>("operation_id"))
            .collect::<Result<_, _>>()
            .map_err(backend_err)?;

        sqlx::query("DELETE FROM error_logs WHERE operation_id IN (SELECT operation_id FROM recovery_state WHERE updated_at < ?1)")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        sqlx::query("DELETE FROM retry_attempts WHERE operation_id IN (SELECT operation_id FROM recovery_state WHERE updated_at < ?1)")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        let result = sqlx::query("DELETE FROM recovery_state WHERE updated_at < ?1")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        debug_assert_eq!(result.rows_affected(), stale.len() as u64);
        Ok(result.rows_affected())
    }

    async fn save_attempt(&self, attempt: &AttemptRecord) -> PersistenceResult<()> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO retry_attempts
                (operation_id, attempt_number, started_at, completed_at, duration_ms, success,
                 error_type, error_message, error_traceback, strategy_name, delay_seconds, context)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&attempt.operation_id)
        .bind(attempt.attempt_number as i64)
        .bind(attempt.started_at.to_rfc3339())
        .bind(attempt.completed_at.map(|t| t.to_rfc3339()))
        .bind(attempt.duration.map(|d| d.as_millis() as i64))
        .bind(attempt.success)
        .bind(attempt.error.as_ref().map(|e| e.error_type.clone()))
        .bind(attempt.error.as_ref().map(|e| e.message.clone()))
        .bind(attempt.error.as_ref().and_then(|e| e.stack.clone()))
        .bind(&attempt.strategy_name)
        .bind(attempt.delay_before.as_secs_f64())
        .bind(serde_json::to_string(&attempt.context).unwrap_or_default())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn save_error_log(&self, entry: &ErrorLogEntry) -> PersistenceResult<()> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO error_logs
                (operation_id, error_category, error_subcategory, severity, error_type, error_message,
                 error_traceback, function_name, attempt_number, recovery_strategy, can_recover, system_info, logged_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&entry.operation_id)
        .bind(serde_json::to_value(entry.category).unwrap().as_str().unwrap_or("unknown").to_string())
        .bind(&entry.subcategory)
        .bind(serde_json::to_value(entry.severity).unwrap().as_str().unwrap_or("low").to_string())
        .bind(&entry.error.error_type)
        .bind(&entry.error.message)
        .bind(&entry.error.stack)
        .bind(&entry.function_name)
        .bind(entry.attempt_number as i64)
        .bind(&entry.strategy_name)
        .bind(entry.can_recover)
        .bind(serde_json::to_string(&entry.system_info).unwrap_or_default())
        .bind(entry.logged_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_attempts(&self, operation_id: &str) -> PersistenceResult<Vec<AttemptRecord>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT * FROM retry_attempts WHERE operation_id = ?1 ORDER BY attempt_number ASC",
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.iter()
            .map(|row| -> PersistenceResult<AttemptRecord> {
                let error_type: Option<String> = row.try_get("error_type").map_err(backend_err)?;
                let error = error_type.map(|t| {
                    let message: String = row.try_get("error_message").unwrap_or_default();
                    let stack: Option<String> = row.try_get("error_traceback").ok().flatten();
                    let mut snapshot = ErrorSnapshot::new(t, message);
                    snapshot.stack = stack;
                    snapshot
                });
                Ok(AttemptRecord {
                    operation_id: row.try_get("operation_id").map_err(backend_err)?,
                    attempt_number: row.try_get::<i64, _>("attempt_number").map_err(backend_err)? as u32,
                    started_at: parse_timestamp(&row.try_get::<String, _>("started_at").map_err(backend_err)?)?,
                    completed_at: row
                        .try_get::<Option<String>, _>("completed_at")
                        .map_err(backend_err)?
                        .map(|s| parse_timestamp(&s))
                        .transpose()?,
                    duration: row
                        .try_get::<Option<i64>, _>("duration_ms")
                        .map_err(backend_err)?
                        .map(|ms| std::time::Duration::from_millis(ms as u64)),
                    success: row.try_get("success").map_err(backend_err)?,
                    error,
                    strategy_name: row.try_get("strategy_name").map_err(backend_err)?,
                    delay_before: std::time::Duration::from_secs_f64(
                        row.try_get::<f64, _>("delay_seconds").map_err(backend_err)?,
                    ),
                    context: serde_json::from_str(&row.try_get::<String, _>("context").map_err(backend_err)?)?,
                })
            })
            .collect()
    }

    async fn list_error_logs(&self, operation_id: &str) -> PersistenceResult<Vec<ErrorLogEntry>> {
        self.ensure_schema().await?;
        let rows = sqlx::query("SELECT * FROM error_logs WHERE operation_id = ?1 ORDER BY id ASC")
            .bind(operation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        rows.iter()
            .map(|row| -> PersistenceResult<ErrorLogEntry> {
                Ok(ErrorLogEntry {
                    operation_id: row.try_get("operation_id").map_err(backend_err)?,
                    category: ErrorCategory::from_str(&row.try_get::<String, _>("error_category").map_err(backend_err)?)?,
                    subcategory: row.try_get("error_subcategory").map_err(backend_err)?,
                    severity: Severity::from_str(&row.try_get::<String, _>("severity").map_err(backend_err)?)?,
                    error: ErrorSnapshot::new(
                        row.try_get::<String, _>("error_type").map_err(backend_err)?,
                        row.try_get::<String, _>("error_message").map_err(backend_err)?,
                    ),
                    function_name: row.try_get("function_name").map_err(backend_err)?,
                    attempt_number: row.try_get::<i64, _>("attempt_number").map_err(backend_err)? as u32,
                    strategy_name: row.try_get("recovery_strategy").map_err(backend_err)?,
                    can_recover: row.try_get("can_recover").map_err(backend_err)?,
                    system_info: serde_json::from_str(&row.try_get::<String, _>("system_info").map_err(backend_err)?)?,
                    logged_at: parse_timestamp(&row.try_get::<String, _>("logged_at").map_err(backend_err)?)?,
                })
            })
            .collect()
    }
}

impl FromStr for ErrorCategory {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(PersistenceError::Serialization)
    }
}

impl FromStr for Severity {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(PersistenceError::Serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_like::TempSqlitePath;

    mod tempfile_like {
        use std::path::PathBuf;

        /// Minimal scratch-file helper so these tests don't depend on the
        /// `tempfile` crate: a unique path under the OS temp dir, removed on
        /// drop.
        pub struct TempSqlitePath(pub PathBuf);

        impl TempSqlitePath {
            pub fn new(label: &str) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "recovery-runtime-{label}-{}.db",
                    uuid::Uuid::new_v4()
                ));
                Self(path)
            }
        }

        impl Drop for TempSqlitePath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    #[tokio::test]
    async fn save_load_and_cascade_delete_round_trip() {
        let scratch = TempSqlitePath::new("round-trip");
        let store = SqlitePersistence::connect(&scratch.0).await.unwrap();

        let record = RecoveryRecord::new("op-sql-1", "example::op");
        store.save(&record).await.unwrap();
        let loaded = store.load("op-sql-1").await.unwrap().unwrap();
        assert_eq!(loaded.operation_id, record.operation_id);

        store
            .save_attempt(&AttemptRecord::start("op-sql-1", 1, "fixed", std::time::Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(store.list_attempts("op-sql-1").await.unwrap().len(), 1);

        store.delete("op-sql-1").await.unwrap();
        assert!(store.load("op-sql-1").await.unwrap().is_none());
        assert!(store.list_attempts("op-sql-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn schema_creation_is_idempotent_under_concurrent_first_calls() {
        let scratch = TempSqlitePath::new("idempotent-schema");
        let store = std::sync::Arc::new(SqlitePersistence::connect(&scratch.0).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.ensure_schema().await.unwrap();
                store
                    .save(&RecoveryRecord::new(format!("op-{i}"), "example::op"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list_keys().await.unwrap().len(), 8);
    }
}
