//! Pluggable backoff strategies. Each strategy computes the delay before a
//! given attempt and decides whether a failure is worth retrying at all;
//! strategies hold no per-call state and must be usable concurrently.

mod custom;
mod exponential;
mod fixed;
mod linear;

pub use custom::Custom;
pub use exponential::Exponential;
pub use fixed::Fixed;
pub use linear::Linear;

use crate::types::ErrorCategory;
use std::time::Duration;

/// Shared contract for every backoff strategy.
pub trait BackoffStrategy: Send + Sync {
    /// Delay to wait before issuing the given attempt (0-indexed; `delay(0)`
    /// is the pre-attempt delay before the very first invocation and is
    /// conventionally zero).
    fn delay(&self, attempt: u32) -> Duration;

    /// Strategy name, used in attempt records and observability events.
    fn name(&self) -> &'static str;

    /// The categories this strategy considers worth retrying.
    fn retryable_categories(&self) -> &[ErrorCategory];

    /// Error-type names that bypass classification and are never retried.
    fn non_retryable_errors(&self) -> &[String] {
        &[]
    }

    /// Default retry decision: stop at the attempt budget, stop on a
    /// configured non-retryable type, otherwise defer to the category.
    fn should_retry(&self, error_type: &str, category: ErrorCategory, attempt: u32, max_attempts: u32) -> bool {
        if attempt >= max_attempts {
            return false;
        }
        if self
            .non_retryable_errors()
            .iter()
            .any(|t| t == error_type)
        {
            return false;
        }
        self.retryable_categories().contains(&category)
    }
}

pub(crate) fn apply_jitter(delay: Duration, jitter_range: f64) -> Duration {
    let base_ms = delay.as_millis() as f64;
    let perturbation = base_ms * jitter_range * (rand::random::<f64>() * 2.0 - 1.0);
    let jittered_ms = (base_ms + perturbation).max(100.0);
    Duration::from_millis(jittered_ms as u64)
}
