//! The orchestration loop: classify, consult the breaker, schedule the
//! delay, apply the timeout, execute, persist, and either return the
//! operation's value or raise an exhaustion error when the attempt budget
//! is spent.

use crate::breaker::{Admission, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig};
use crate::classifier::ErrorClassifier;
use crate::identity::{derive_operation_id, CallContext, FingerprintFn};
use crate::observability::{EventSink, RecoveryEvent, TracingSink};
use crate::persistence::{InMemoryStore, RecoveryStore};
use crate::strategy::{BackoffStrategy, Exponential};
use crate::types::{
    AttemptRecord, ErrorCategory, ErrorLogEntry, ErrorSnapshot, OperationState, RecoveryConfig,
    RecoveryRecord, Severity,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The engine's only source of delay between attempts, pulled out behind a
/// trait so tests can swap wall-clock sleeping for an instant fake (see
/// `testing::ManualClock`) without changing the attempt loop itself.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// The default sleeper: a thin wrapper over `tokio::time::sleep`.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if duration > Duration::ZERO {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Blanket classification surface for a wrapped operation's error type.
/// Structural classification and `non_retryable_errors` both key off this
/// name, so it defaults to the bare Rust type name (no module path) rather
/// than `std::any::type_name`'s full path — a blanket impl can't see which
/// enum variant is active, so discriminating between variants of one error
/// type is left to the classifier's message-fragment fallback.
pub trait ClassifiableError: std::error::Error {
    fn type_name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        match full.rsplit("::").next() {
            Some(name) => name,
            None => full,
        }
    }
}

impl<E: std::error::Error> ClassifiableError for E {}

/// Why an attempt loop terminated in failure.
#[derive(Debug)]
pub enum FailureCause<E> {
    Operation(E),
    Timeout(Duration),
}

impl<E: std::fmt::Display> std::fmt::Display for FailureCause<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Operation(e) => write!(f, "{e}"),
            FailureCause::Timeout(d) => write!(f, "timed out after {d:?}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for FailureCause<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FailureCause::Operation(e) => Some(e),
            FailureCause::Timeout(_) => None,
        }
    }
}

/// The only error kinds the wrapper itself introduces into a wrapped call.
#[derive(Debug, Error)]
pub enum WrapperError<E: std::error::Error + Send + Sync + 'static> {
    #[error("operation exhausted after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        cause: FailureCause<E>,
    },
    #[error("circuit open for {function_name}, retry after {retry_after:?}")]
    CircuitOpen {
        function_name: String,
        retry_after: Duration,
    },
    #[error("failed to serialize call payload")]
    Serialization(#[source] serde_json::Error),
}

impl<E: std::error::Error + Send + Sync + 'static> WrapperError<E> {
    pub fn attempts(&self) -> Option<u32> {
        match self {
            WrapperError::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            WrapperError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

pub type RecoveryOutcome<T, E> = Result<T, WrapperError<E>>;

/// Wraps one logical operation with retry, breaker, persistence, and
/// observability behavior. Built once per wrapped function and reused
/// across calls; cheap to clone (everything inside is `Arc`-shared).
pub struct Recovery<T, E> {
    function_name: String,
    config: RecoveryConfig,
    strategy: Arc<dyn BackoffStrategy>,
    store: Arc<dyn RecoveryStore>,
    breaker: Arc<CircuitBreaker>,
    classifier: Arc<ErrorClassifier>,
    sink: Arc<dyn EventSink>,
    fingerprint: Option<Arc<FingerprintFn>>,
    call_locks: Arc<parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    sleeper: Arc<dyn Sleeper>,
    _marker: PhantomData<fn() -> Result<T, E>>,
}

impl<T, E> Clone for Recovery<T, E> {
    fn clone(&self) -> Self {
        Self {
            function_name: self.function_name.clone(),
            config: self.config.clone(),
            strategy: self.strategy.clone(),
            store: self.store.clone(),
            breaker: self.breaker.clone(),
            classifier: self.classifier.clone(),
            sink: self.sink.clone(),
            fingerprint: self.fingerprint.clone(),
            call_locks: self.call_locks.clone(),
            sleeper: self.sleeper.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, E> Recovery<T, E>
where
    E: ClassifiableError + Send + Sync + 'static,
{
    /// Build a wrapper with the default in-memory store, default exponential
    /// backoff, a process-wide breaker keyed by `function_name`, and a
    /// tracing-only observability sink.
    pub fn new(function_name: impl Into<String>, config: RecoveryConfig) -> Self {
        let function_name = function_name.into();
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            threshold: config.circuit_breaker_threshold,
            reset_timeout: config.circuit_breaker_timeout,
        }));
        Self {
            function_name,
            config,
            strategy: Arc::new(Exponential::default()),
            store: Arc::new(InMemoryStore::new()),
            breaker,
            classifier: Arc::new(ErrorClassifier::new()),
            sink: Arc::new(TracingSink),
            fingerprint: None,
            call_locks: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            sleeper: Arc::new(TokioSleeper),
            _marker: PhantomData,
        }
    }

    /// Build a wrapper that shares a breaker from a process-wide registry,
    /// so multiple wrappers for the same logical function observe the same
    /// trip state.
    pub fn with_registry(
        function_name: impl Into<String>,
        config: RecoveryConfig,
        registry: &BreakerRegistry,
    ) -> Self {
        let function_name = function_name.into();
        let breaker = registry.get_or_create(
            &function_name,
            CircuitBreakerConfig {
                threshold: config.circuit_breaker_threshold,
                reset_timeout: config.circuit_breaker_timeout,
            },
        );
        Self {
            function_name,
            config,
            strategy: Arc::new(Exponential::default()),
            store: Arc::new(InMemoryStore::new()),
            breaker,
            classifier: Arc::new(ErrorClassifier::new()),
            sink: Arc::new(TracingSink),
            fingerprint: None,
            call_locks: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            sleeper: Arc::new(TokioSleeper),
            _marker: PhantomData,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn BackoffStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RecoveryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Arc<FingerprintFn>) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Override the delay mechanism between attempts. Production code never
    /// needs this; tests swap in `testing::ManualClock` to assert on backoff
    /// timing without sleeping on the wall clock.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn lock_for(&self, operation_id: &str) -> Arc<AsyncMutex<()>> {
        self.call_locks
            .lock()
            .entry(operation_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn emit(&self, event: RecoveryEvent) {
        if self.config.enable_observability {
            self.sink.emit(event);
        }
    }

    async fn persist(&self, record: &RecoveryRecord, force: bool) {
        if !self.config.enable_persistence {
            return;
        }
        if self.config.lazy_persistence && !force && !record.state.is_terminal() {
            return;
        }
        if let Err(error) = self.store.save(record).await {
            warn!(
                operation_id = %record.operation_id,
                function = %self.function_name,
                %error,
                "failed to persist recovery record"
            );
        }
    }

    /// Run `operation` under this wrapper's retry, breaker, and persistence
    /// policy. `operation` is re-invoked per attempt with no arguments — the
    /// caller's business arguments are expected to already be captured in
    /// the closure, keeping the wrapper ignorant of what it wraps.
    pub async fn call<F, Fut>(
        &self,
        context: CallContext,
        operation: F,
    ) -> RecoveryOutcome<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_cancellable(context, operation, CancellationToken::new())
            .await
    }

    /// Convenience entry point that serializes `args`/`kwargs` into the
    /// call context itself, surfacing a non-serializable input as
    /// `WrapperError::Serialization` before the operation id is derived or
    /// anything is persisted.
    pub async fn call_with_args<F, Fut, A, K>(
        &self,
        operation_id: Option<String>,
        args: A,
        kwargs: K,
        operation: F,
    ) -> RecoveryOutcome<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: serde::Serialize,
        K: serde::Serialize,
    {
        let mut context = CallContext::new();
        if let Some(id) = operation_id {
            context = context.with_operation_id(id);
        }
        let context = context
            .with_args(args)
            .and_then(|c| c.with_kwargs(kwargs))
            .map_err(WrapperError::Serialization)?;
        self.call(context, operation).await
    }

    /// Same as [`call`], but the backoff sleep and the operation's own
    /// future are raced against the supplied cancellation token.
    pub async fn call_cancellable<F, Fut>(
        &self,
        context: CallContext,
        operation: F,
        cancellation: CancellationToken,
    ) -> RecoveryOutcome<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let operation_id = derive_operation_id(&context, self.fingerprint.as_deref());
        let lock = self.lock_for(&operation_id);
        let _guard = lock.lock().await;

        match self.breaker.can_execute(&self.function_name) {
            Admission::Rejected { retry_after } => {
                return Err(WrapperError::CircuitOpen {
                    function_name: self.function_name.clone(),
                    retry_after,
                });
            }
            Admission::Allowed => {}
        }

        let mut record = match self.store.load(&operation_id).await {
            Ok(Some(existing)) if existing.state == OperationState::Recovering => existing,
            _ => {
                let mut fresh = RecoveryRecord::new(operation_id.clone(), self.function_name.clone());
                fresh.args = context.args.clone();
                fresh.kwargs = context.kwargs.clone();
                fresh
            }
        };

        record.state = OperationState::InProgress;
        record.touch();
        self.persist(&record, false).await;

        info!(
            operation_id = %operation_id,
            function = %self.function_name,
            "🔄 processing operation"
        );

        let mut attempt = record.attempt;

        loop {
            // Computed once per iteration and reused for the sleep and the
            // attempt record: the strategy may apply random jitter, so
            // calling `delay` twice would sleep for a different duration
            // than the one recorded.
            let delay_before = if attempt > 0 {
                self.strategy.delay(attempt)
            } else {
                Duration::ZERO
            };

            if delay_before > Duration::ZERO {
                tokio::select! {
                    _ = self.sleeper.sleep(delay_before) => {}
                    _ = cancellation.cancelled() => {
                        return Err(WrapperError::Exhausted {
                            attempts: attempt,
                            cause: FailureCause::Timeout(delay_before),
                        });
                    }
                }
                record.state = OperationState::InProgress;
                self.persist(&record, false).await;
            }

            let attempt_number = attempt + 1;
            let mut attempt_record = AttemptRecord::start(
                operation_id.clone(),
                attempt_number,
                self.strategy.name(),
                delay_before,
            );

            self.emit(RecoveryEvent {
                operation_id: operation_id.clone(),
                function_name: self.function_name.clone(),
                attempt: attempt_number,
                state: OperationState::InProgress,
                category: None,
                delay: Some(delay_before),
                strategy: self.strategy.name().to_string(),
            });

            let invocation = operation();
            let outcome = match self.config.timeout {
                Some(timeout) => {
                    tokio::select! {
                        result = tokio::time::timeout(timeout, invocation) => {
                            match result {
                                Ok(inner) => inner.map_err(FailureCause::Operation),
                                Err(_) => Err(FailureCause::Timeout(timeout)),
                            }
                        }
                        _ = cancellation.cancelled() => {
                            Err(FailureCause::Timeout(timeout))
                        }
                    }
                }
                None => {
                    tokio::select! {
                        result = invocation => result.map_err(FailureCause::Operation),
                        _ = cancellation.cancelled() => Err(FailureCause::Timeout(Duration::ZERO)),
                    }
                }
            };

            match outcome {
                Ok(value) => {
                    attempt_record.complete(true, None);
                    if self.config.enable_persistence {
                        if let Err(error) = self.store.save_attempt(&attempt_record).await {
                            warn!(%error, "failed to persist attempt record");
                        }
                    }

                    record.state = OperationState::Success;
                    record.attempt = attempt;
                    record.touch();
                    self.persist(&record, true).await;
                    self.breaker.record_success(&self.function_name);

                    self.emit(RecoveryEvent {
                        operation_id: operation_id.clone(),
                        function_name: self.function_name.clone(),
                        attempt: attempt_number,
                        state: OperationState::Success,
                        category: None,
                        delay: None,
                        strategy: self.strategy.name().to_string(),
                    });
                    info!(
                        operation_id = %operation_id,
                        function = %self.function_name,
                        attempt = attempt_number,
                        "✅ operation succeeded"
                    );

                    return Ok(value);
                }
                Err(cause) => {
                    let (error_type, message) = match &cause {
                        FailureCause::Operation(e) => (e.type_name().to_string(), e.to_string()),
                        FailureCause::Timeout(d) => ("TimeoutError".to_string(), format!("timed out after {d:?}")),
                    };
                    let (category, recoverable) = match &cause {
                        FailureCause::Timeout(_) => (ErrorCategory::Timeout, true),
                        FailureCause::Operation(_) => self.classifier.classify(&error_type, &message),
                    };

                    let snapshot = ErrorSnapshot::new(error_type.clone(), message.clone());
                    attempt_record.complete(false, Some(snapshot.clone()));
                    if self.config.enable_persistence {
                        if let Err(error) = self.store.save_attempt(&attempt_record).await {
                            warn!(%error, "failed to persist attempt record");
                        }
                    }

                    let config_forbids_retry = self
                        .config
                        .non_retryable_errors
                        .iter()
                        .any(|t| t == &error_type);

                    let should_retry = recoverable
                        && !config_forbids_retry
                        && self.strategy.should_retry(
                            &error_type,
                            category,
                            attempt,
                            self.config.max_retries,
                        );

                    let severity = if should_retry { Severity::Medium } else { Severity::High };
                    let error_log = ErrorLogEntry {
                        operation_id: operation_id.clone(),
                        category,
                        subcategory: None,
                        severity,
                        error: snapshot.clone(),
                        function_name: self.function_name.clone(),
                        attempt_number,
                        strategy_name: self.strategy.name().to_string(),
                        can_recover: should_retry,
                        system_info: HashMap::new(),
                        logged_at: chrono::Utc::now(),
                    };
                    if self.config.enable_persistence {
                        if let Err(error) = self.store.save_error_log(&error_log).await {
                            warn!(%error, "failed to persist error log entry");
                        }
                    }

                    self.emit(RecoveryEvent {
                        operation_id: operation_id.clone(),
                        function_name: self.function_name.clone(),
                        attempt: attempt_number,
                        state: OperationState::Recovering,
                        category: Some(category),
                        delay: None,
                        strategy: self.strategy.name().to_string(),
                    });

                    attempt += 1;

                    if should_retry {
                        record.state = OperationState::Recovering;
                        record.attempt = attempt;
                        record.last_error = Some(snapshot);
                        record.touch();
                        self.persist(&record, false).await;
                        continue;
                    }

                    let terminal_state = if attempt_number >= self.config.budget_exhausted_at() {
                        OperationState::Exhausted
                    } else {
                        OperationState::Failed
                    };

                    record.state = terminal_state;
                    record.attempt = attempt;
                    record.last_error = Some(snapshot);
                    record.touch();
                    self.persist(&record, true).await;
                    self.breaker.record_failure(&self.function_name);

                    self.emit(RecoveryEvent {
                        operation_id: operation_id.clone(),
                        function_name: self.function_name.clone(),
                        attempt: attempt_number,
                        state: terminal_state,
                        category: Some(category),
                        delay: None,
                        strategy: self.strategy.name().to_string(),
                    });
                    warn!(
                        operation_id = %operation_id,
                        function = %self.function_name,
                        attempts = attempt_number,
                        ?terminal_state,
                        "operation exhausted"
                    );

                    return Err(WrapperError::Exhausted {
                        attempts: attempt_number,
                        cause,
                    });
                }
            }
        }
    }
}

impl RecoveryConfig {
    /// Attempt number (1-indexed) at which the budget itself is exhausted;
    /// used to distinguish a non-retryable `Failed` from a budget-spent
    /// `Exhausted` when both land on the same terminal write.
    pub(crate) fn budget_exhausted_at(&self) -> u32 {
        self.budget()
    }
}
