use super::BackoffStrategy;
use crate::types::ErrorCategory;
use std::time::Duration;

/// Caller-supplied delay function, capped by `max_delay` like every other
/// strategy. Useful for delay schedules the built-in strategies don't cover
/// (e.g. a lookup table, or mirroring a third-party API's `Retry-After`).
pub struct Custom {
    compute: Box<dyn Fn(u32) -> Duration + Send + Sync>,
    pub max_delay: Duration,
    pub non_retryable_errors: Vec<String>,
    pub retryable_categories: Vec<ErrorCategory>,
}

impl Custom {
    pub fn new(max_delay: Duration, compute: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            compute: Box::new(compute),
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

impl BackoffStrategy for Custom {
    fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        (self.compute)(attempt).min(self.max_delay)
    }

    fn name(&self) -> &'static str {
        "custom"
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
    fn delegates_to_the_closure_and_caps_the_result() {
        let strategy = Custom::new(Duration::from_millis(500), |attempt| {
            Duration::from_millis(u64::from(attempt) * 1000)
        });
        assert_eq!(strategy.delay(0), Duration::ZERO);
        assert_eq!(strategy.delay(1), Duration::from_millis(500));
    }
}
