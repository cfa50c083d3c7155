use super::BackoffStrategy;
use crate::strategy::apply_jitter;
use crate::types::ErrorCategory;
use std::time::Duration;

/// `min(initial * factor^attempt, max_delay)`, optionally perturbed by
/// uniform jitter and floored at 100ms.
#[derive(Debug, Clone)]
pub struct Exponential {
    pub initial: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub jitter: bool,
    pub jitter_range: f64,
    pub non_retryable_errors: Vec<String>,
    pub retryable_categories: Vec<ErrorCategory>,
}

impl Exponential {
    pub fn new(initial: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            initial,
            factor,
            max_delay,
            jitter: true,
            jitter_range: 0.1,
            non_retryable_errors: Vec::new(),
            retryable_categories: ErrorCategory::default_retryable_set(),
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn non_retryable(mut self, errors: Vec<String>) -> Self {
        self.non_retryable_errors = errors;
        self
    }

    /// Override which categories this strategy treats as worth retrying,
    /// e.g. `{Network, Timeout}` to stop retrying on `Resource`/`Unknown`.
    pub fn with_retryable_categories(mut self, categories: Vec<ErrorCategory>) -> Self {
        self.retryable_categories = categories;
        self
    }
}

impl Default for Exponential {
    /// `initial=1s, factor=2, max=60s, jitter=on` — the wrapper's default.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(60))
    }
}

impl BackoffStrategy for Exponential {
    fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw_ms = self.initial.as_millis() as f64 * self.factor.powi(attempt as i32 - 1);
        let capped = Duration::from_millis(raw_ms as u64).min(self.max_delay);
        if self.jitter {
            apply_jitter(capped, self.jitter_range).min(self.max_delay)
        } else {
            capped
        }
    }

    fn name(&self) -> &'static str {
        "exponential"
    }

    fn retryable_categories(&self) -> &[ErrorCategory] {
        &self.retryable_categories
    }

    fn non_retryable_errors(&self) -> &[String] {
        &self.non_retryable_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_monotonic_without_jitter() {
        let strategy = Exponential::new(Duration::from_millis(10), 2.0, Duration::from_secs(60))
            .without_jitter();
        let mut previous = strategy.delay(1);
        for attempt in 2..10 {
            let current = strategy.delay(attempt);
            assert!(current >= previous, "delay decreased at attempt {attempt}");
            previous = current;
        }
    }

    #[test]
    fn delay_is_capped_at_max() {
        let strategy = Exponential::new(Duration::from_secs(1), 2.0, Duration::from_secs(5))
            .without_jitter();
        assert_eq!(strategy.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn first_attempt_has_no_delay() {
        let strategy = Exponential::default();
        assert_eq!(strategy.delay(0), Duration::ZERO);
    }

    #[test]
    fn matches_scenario_s2_delays() {
        let strategy = Exponential::new(Duration::from_millis(10), 2.0, Duration::from_secs(60))
            .without_jitter();
        assert_eq!(strategy.delay(0), Duration::from_millis(0));
        assert_eq!(strategy.delay(1), Duration::from_millis(10));
        assert_eq!(strategy.delay(2), Duration::from_millis(20));
    }

    #[test]
    fn retryable_categories_can_be_narrowed() {
        let strategy = Exponential::default()
            .with_retryable_categories(vec![ErrorCategory::Network, ErrorCategory::Timeout]);
        assert!(strategy.should_retry("Err", ErrorCategory::Network, 0, 3));
        assert!(!strategy.should_retry("Err", ErrorCategory::Resource, 0, 3));
    }
}
