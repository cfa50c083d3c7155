//! Maps an arbitrary wrapped-operation error to an [`ErrorCategory`] and a
//! retryability hint. Pure and deterministic except for the LRU cache's
//! eviction order; never panics.

use crate::types::ErrorCategory;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

const CACHE_CAPACITY: usize = 256;

/// Classifies errors by their concrete type name and, as a fallback, by
/// fragments of their message. Repeated classifications of the same type
/// name are served from a bounded cache.
pub struct ErrorClassifier {
    cache: Mutex<LruCache<String, (ErrorCategory, bool)>>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero capacity"),
            )),
        }
    }

    /// Classify an error identified by its type name and display message.
    ///
    /// Returns `(category, is_recoverable)`. Unknown errors default to
    /// `(Unknown, true)` — under-retrying a transient is worse than
    /// over-retrying a permanent fault the breaker will stop.
    pub fn classify(&self, type_name: &str, message: &str) -> (ErrorCategory, bool) {
        if let Some(hit) = self.cache.lock().get(type_name).copied() {
            return hit;
        }

        let result = Self::classify_structural(type_name)
            .unwrap_or_else(|| Self::classify_by_message(message));

        self.cache.lock().put(type_name.to_string(), result);
        result
    }

    fn classify_structural(type_name: &str) -> Option<(ErrorCategory, bool)> {
        let lower = type_name.to_ascii_lowercase();
        let hit = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if hit(&["timeout", "timedout"]) {
            Some((ErrorCategory::Timeout, true))
        } else if hit(&["connection", "socket", "dns", "network", "unreachable"]) {
            Some((ErrorCategory::Network, true))
        } else if hit(&["permission", "denied", "forbidden", "unauthorized"]) {
            Some((ErrorCategory::Permission, false))
        } else if hit(&["value", "type", "key", "schema", "validation", "parse"]) {
            Some((ErrorCategory::Validation, false))
        } else if hit(&["memory", "disk", "quota", "capacity", "resource"]) {
            Some((ErrorCategory::Resource, true))
        } else {
            None
        }
    }

    fn classify_by_message(message: &str) -> (ErrorCategory, bool) {
        let lower = message.to_ascii_lowercase();
        let hit = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if hit(&["timed out", "timeout"]) {
            (ErrorCategory::Timeout, true)
        } else if hit(&["connection", "refused", "reset by peer", "dns", "unreachable"]) {
            (ErrorCategory::Network, true)
        } else if hit(&["permission denied", "forbidden", "unauthorized"]) {
            (ErrorCategory::Permission, false)
        } else if hit(&["invalid", "validation", "malformed", "bad input"]) {
            (ErrorCategory::Validation, false)
        } else if hit(&["out of memory", "disk full", "quota exceeded"]) {
            (ErrorCategory::Resource, true)
        } else if hit(&["panic", "internal error", "system error"]) {
            (ErrorCategory::System, false)
        } else {
            (ErrorCategory::Unknown, true)
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_errors_by_type_name() {
        let classifier = ErrorClassifier::new();
        let (category, recoverable) = classifier.classify("ConnectionRefusedError", "refused");
        assert_eq!(category, ErrorCategory::Network);
        assert!(recoverable);
    }

    #[test]
    fn classifies_validation_errors_as_non_retryable() {
        let classifier = ErrorClassifier::new();
        let (category, recoverable) = classifier.classify("ValueError", "bad input");
        assert_eq!(category, ErrorCategory::Validation);
        assert!(!recoverable);
    }

    #[test]
    fn falls_back_to_message_fragments() {
        let classifier = ErrorClassifier::new();
        let (category, recoverable) =
            classifier.classify("OpaqueError", "the upstream DNS lookup failed");
        assert_eq!(category, ErrorCategory::Network);
        assert!(recoverable);
    }

    #[test]
    fn defaults_unknown_errors_to_recoverable() {
        let classifier = ErrorClassifier::new();
        let (category, recoverable) = classifier.classify("WeirdError", "something odd happened");
        assert_eq!(category, ErrorCategory::Unknown);
        assert!(recoverable);
    }

    #[test]
    fn repeated_classification_is_served_from_cache() {
        let classifier = ErrorClassifier::new();
        let first = classifier.classify("TimeoutError", "request timed out");
        let second = classifier.classify("TimeoutError", "a completely different message");
        assert_eq!(first, second);
    }
}
