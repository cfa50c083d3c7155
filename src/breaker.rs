//! Per-function-identity circuit breaker. One entry per module-qualified
//! function name, held in a process-wide registry that survives for the
//! lifetime of the process.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    tripped_at: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            tripped_at: None,
        }
    }
}

/// The outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after: Duration },
}

/// One breaker per function identity, safe under concurrent access. The
/// state transition is atomic with respect to the counter update because
/// every method takes the per-key lock for its whole critical section.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<String, BreakerEntry>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn can_execute(&self, function_name: &str) -> Admission {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(function_name.to_string())
            .or_insert_with(BreakerEntry::new);

        match entry.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::HalfOpen => Admission::Allowed,
            CircuitState::Open => {
                let tripped_at = entry.tripped_at.expect("open breaker always has a trip time");
                let elapsed = tripped_at.elapsed();
                if elapsed >= self.config.reset_timeout {
                    info!(function = function_name, "circuit breaker half-open, allowing trial call");
                    entry.state = CircuitState::HalfOpen;
                    Admission::Allowed
                } else {
                    Admission::Rejected {
                        retry_after: self.config.reset_timeout - elapsed,
                    }
                }
            }
        }
    }

    pub fn record_success(&self, function_name: &str) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(function_name.to_string())
            .or_insert_with(BreakerEntry::new);

        if entry.state != CircuitState::Closed {
            info!(function = function_name, "circuit breaker closed after successful trial");
        }
        entry.state = CircuitState::Closed;
        entry.failure_count = 0;
        entry.tripped_at = None;
    }

    pub fn record_failure(&self, function_name: &str) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(function_name.to_string())
            .or_insert_with(BreakerEntry::new);

        entry.failure_count += 1;

        match entry.state {
            CircuitState::HalfOpen => {
                warn!(function = function_name, "trial call failed, circuit breaker reopened");
                entry.state = CircuitState::Open;
                entry.tripped_at = Some(Instant::now());
            }
            CircuitState::Closed if entry.failure_count >= self.config.threshold => {
                warn!(
                    function = function_name,
                    failures = entry.failure_count,
                    "circuit breaker tripped open"
                );
                entry.state = CircuitState::Open;
                entry.tripped_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub fn state_of(&self, function_name: &str) -> CircuitState {
        self.entries
            .lock()
            .get(function_name)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Process-wide registry keyed by function identity, created lazily and
/// exposed so tests can reset it between cases. Owned by this module, not a
/// hidden-lifecycle singleton.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, function_name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(function_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(config)))
            .clone()
    }

    pub fn reset(&self) {
        self.breakers.lock().clear();
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: 5,
            reset_timeout: Duration::from_secs(300),
        });
        for _ in 0..5 {
            assert_eq!(breaker.can_execute("F"), Admission::Allowed);
            breaker.record_failure("F");
        }
        assert!(matches!(
            breaker.can_execute("F"),
            Admission::Rejected { .. }
        ));
    }

    #[test]
    fn breaker_recovers_after_reset_timeout() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: 1,
            reset_timeout: Duration::from_millis(10),
        });
        breaker.record_failure("F");
        assert!(matches!(
            breaker.can_execute("F"),
            Admission::Rejected { .. }
        ));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.can_execute("F"), Admission::Allowed);
        assert_eq!(breaker.state_of("F"), CircuitState::HalfOpen);
        breaker.record_success("F");
        assert_eq!(breaker.state_of("F"), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_the_breaker() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: 1,
            reset_timeout: Duration::from_millis(10),
        });
        breaker.record_failure("F");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.can_execute("F"), Admission::Allowed);
        breaker.record_failure("F");
        assert!(matches!(
            breaker.can_execute("F"),
            Admission::Rejected { .. }
        ));
    }

    #[test]
    fn breakers_are_independent_per_function_identity() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: 1,
            reset_timeout: Duration::from_secs(300),
        });
        breaker.record_failure("F");
        assert!(matches!(
            breaker.can_execute("F"),
            Admission::Rejected { .. }
        ));
        assert_eq!(breaker.can_execute("G"), Admission::Allowed);
    }

    #[test]
    fn registry_returns_the_same_breaker_for_the_same_key() {
        let registry = BreakerRegistry::new();
        let a = registry.get_or_create("F", CircuitBreakerConfig::default());
        let b = registry.get_or_create("F", CircuitBreakerConfig::default());
        a.record_failure("F");
        assert_eq!(b.state_of("F"), CircuitState::Closed);
        for _ in 0..4 {
            a.record_failure("F");
        }
        assert_eq!(b.state_of("F"), CircuitState::Open);
    }
}
