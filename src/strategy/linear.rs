use super::BackoffStrategy;
use crate::types::ErrorCategory;
use std::time::Duration;

/// `min(initial + increment * attempt, max_delay)`.
#[derive(Debug, Clone)]
pub struct Linear {
    pub initial: Duration,
    pub increment: Duration,
    pub max_delay: Duration,
    pub non_retryable_errors: Vec<String>,
    pub retryable_categories: Vec<ErrorCategory>,
}

impl Linear {
    pub fn new(initial: Duration, increment: Duration, max_delay: Duration) -> Self {
        Self {
            initial,
            increment,
            max_delay,
            non_retryable_errors: Vec::new(),
            retryable_categories: ErrorCategory::default_retryable_set(),
        }
    }

    pub fn non_retryable(mut self, errors: Vec<String>) -> Self {
        self.non_retryable_errors = errors;
        self
    }

    pub fn with_retryable_categories(mut self, categories: Vec<ErrorCategory>) -> Self {
        self.retryable_categories = categories;
        self
    }
}

impl BackoffStrategy for Linear {
    fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = self.initial + self.increment * (attempt - 1);
        raw.min(self.max_delay)
    }

    fn name(&self) -> &'static str {
        "linear"
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
    fn delay_is_monotonic() {
        let strategy = Linear::new(
            Duration::from_millis(100),
            Duration::from_millis(50),
            Duration::from_secs(10),
        );
        let mut previous = strategy.delay(1);
        for attempt in 2..20 {
            let current = strategy.delay(attempt);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn delay_is_capped() {
        let strategy = Linear::new(
            Duration::from_millis(100),
            Duration::from_millis(50),
            Duration::from_millis(200),
        );
        assert_eq!(strategy.delay(100), Duration::from_millis(200));
    }
}
