use super::BackoffStrategy;
use crate::types::ErrorCategory;
use std::time::Duration;

/// Constant delay between every retry.
#[derive(Debug, Clone)]
pub struct Fixed {
    pub delay: Duration,
    pub non_retryable_errors: Vec<String>,
    pub retryable_categories: Vec<ErrorCategory>,
}

impl Fixed {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
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

impl BackoffStrategy for Fixed {
    fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
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
    fn delay_is_constant_after_first_attempt() {
        let strategy = Fixed::new(Duration::from_millis(250));
        assert_eq!(strategy.delay(0), Duration::ZERO);
        assert_eq!(strategy.delay(1), Duration::from_millis(250));
        assert_eq!(strategy.delay(50), Duration::from_millis(250));
    }
}
