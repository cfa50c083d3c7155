//! Canonical data shapes shared by every component of the recovery runtime:
//! operation state, the durable recovery record and its subordinate attempt
//! and error-log entries, the closed error-category set, and the per-wrap
//! configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Lifecycle state of one logical operation.
///
/// `Success`, `Failed`, and `Exhausted` are terminal; every other state can
/// still transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    InProgress,
    Recovering,
    Success,
    Failed,
    Exhausted,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Success | OperationState::Failed | OperationState::Exhausted
        )
    }
}

/// Closed set of error categories the classifier can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Resource,
    Permission,
    Validation,
    System,
    Unknown,
}

impl ErrorCategory {
    /// The categories a default strategy treats as worth retrying.
    pub fn default_retryable_set() -> Vec<ErrorCategory> {
        vec![
            ErrorCategory::Network,
            ErrorCategory::Timeout,
            ErrorCategory::Resource,
            ErrorCategory::Unknown,
        ]
    }
}

/// Severity of a logged error, independent of retryability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Snapshot of an original error as it crossed the wrapper boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSnapshot {
    pub error_type: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorSnapshot {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// The durable unit of the recovery store, keyed by operation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub operation_id: String,
    pub function_name: String,
    pub args: Value,
    pub kwargs: Value,
    pub state: OperationState,
    /// 0-based; counts completed *failed* attempts, not the in-flight one.
    pub attempt: u32,
    pub last_error: Option<ErrorSnapshot>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecoveryRecord {
    pub fn new(operation_id: impl Into<String>, function_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            operation_id: operation_id.into(),
            function_name: function_name.into(),
            args: Value::Array(Vec::new()),
            kwargs: Value::Object(serde_json::Map::new()),
            state: OperationState::Pending,
            attempt: 0,
            last_error: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One invocation of the wrapped operation, numbered from 1 per operation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub operation_id: String,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub success: bool,
    pub error: Option<ErrorSnapshot>,
    pub strategy_name: String,
    pub delay_before: Duration,
    pub context: HashMap<String, Value>,
}

impl AttemptRecord {
    pub fn start(operation_id: impl Into<String>, attempt_number: u32, strategy_name: impl Into<String>, delay_before: Duration) -> Self {
        Self {
            operation_id: operation_id.into(),
            attempt_number,
            started_at: Utc::now(),
            completed_at: None,
            duration: None,
            success: false,
            error: None,
            strategy_name: strategy_name.into(),
            delay_before,
            context: HashMap::new(),
        }
    }

    pub fn complete(&mut self, success: bool, error: Option<ErrorSnapshot>) {
        let completed_at = Utc::now();
        self.duration = (completed_at - self.started_at).to_std().ok();
        self.completed_at = Some(completed_at);
        self.success = success;
        self.error = error;
    }
}

/// Subordinate record describing one classified failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub operation_id: String,
    pub category: ErrorCategory,
    pub subcategory: Option<String>,
    pub severity: Severity,
    pub error: ErrorSnapshot,
    pub function_name: String,
    pub attempt_number: u32,
    pub strategy_name: String,
    pub can_recover: bool,
    pub system_info: HashMap<String, String>,
    pub logged_at: DateTime<Utc>,
}

/// Per-wrap configuration: how many times to retry, with what delay, under
/// what timeout, against which persistence and circuit-breaker parameters.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub timeout: Option<Duration>,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    /// Error-type names that bypass the strategy's own retry decision and
    /// are never retried, regardless of category. Checked in addition to
    /// any strategy-scoped `non_retryable_errors`.
    pub non_retryable_errors: Vec<String>,
    pub enable_persistence: bool,
    pub enable_observability: bool,
    pub lazy_persistence: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: None,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(300),
            non_retryable_errors: Vec::new(),
            enable_persistence: true,
            enable_observability: true,
            lazy_persistence: false,
        }
    }
}

impl RecoveryConfig {
    /// Total number of attempts allowed before exhaustion.
    pub fn budget(&self) -> u32 {
        self.max_retries + 1
    }
}
