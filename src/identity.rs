//! Deterministic operation-identifier derivation: caller-supplied key,
//! argument fingerprint, or random UUID. Opaque strings, at most 255 chars.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub const MAX_OPERATION_ID_LEN: usize = 255;

/// Business arguments plus the wrapper's own bookkeeping, passed alongside
/// the operation instead of smuggled through its own argument list.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Caller-supplied operation id, reserved for resumption.
    pub operation_id: Option<String>,
    pub args: Value,
    pub kwargs: Value,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            operation_id: None,
            args: Value::Array(Vec::new()),
            kwargs: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    pub fn with_args(mut self, args: impl Serialize) -> Result<Self, serde_json::Error> {
        self.args = serde_json::to_value(args)?;
        Ok(self)
    }

    pub fn with_kwargs(mut self, kwargs: impl Serialize) -> Result<Self, serde_json::Error> {
        self.kwargs = serde_json::to_value(kwargs)?;
        Ok(self)
    }
}

/// A stable-fingerprint function: computes an operation id from arguments so
/// logically-identical in-flight calls can be deduplicated.
pub type FingerprintFn = dyn Fn(&Value, &Value) -> String + Send + Sync;

/// Resolve the operation id for a call, in priority order: explicit
/// override, stable fingerprint, random UUID.
pub fn derive_operation_id(
    context: &CallContext,
    fingerprint: Option<&FingerprintFn>,
) -> String {
    if let Some(id) = &context.operation_id {
        return truncate(id);
    }
    if let Some(f) = fingerprint {
        return truncate(&f(&context.args, &context.kwargs));
    }
    Uuid::new_v4().to_string()
}

fn truncate(id: &str) -> String {
    if id.len() <= MAX_OPERATION_ID_LEN {
        return id.to_string();
    }
    // Truncate on a char boundary: a naive byte slice can land mid-codepoint
    // on multi-byte input and panic.
    let cut = id
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= MAX_OPERATION_ID_LEN)
        .last()
        .unwrap_or(0);
    id[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_the_explicit_override() {
        let ctx = CallContext::new().with_operation_id("op-42");
        assert_eq!(derive_operation_id(&ctx, None), "op-42");
    }

    #[test]
    fn falls_back_to_a_stable_fingerprint() {
        let ctx = CallContext::new()
            .with_args(vec!["a", "b"])
            .unwrap();
        let fingerprint: &FingerprintFn = &|args, _kwargs| format!("fp-{}", args);
        let first = derive_operation_id(&ctx, Some(fingerprint));
        let second = derive_operation_id(&ctx, Some(fingerprint));
        assert_eq!(first, second);
    }

    #[test]
    fn generates_a_random_id_with_no_override_or_fingerprint() {
        let ctx = CallContext::new();
        let first = derive_operation_id(&ctx, None);
        let second = derive_operation_id(&ctx, None);
        assert_ne!(first, second);
    }

    #[test]
    fn truncates_ids_longer_than_the_limit() {
        let long_id = "x".repeat(400);
        let ctx = CallContext::new().with_operation_id(long_id);
        assert_eq!(derive_operation_id(&ctx, None).len(), MAX_OPERATION_ID_LEN);
    }

    #[test]
    fn truncates_multibyte_ids_on_a_char_boundary() {
        // Each '💥' is 4 bytes; 100 of them land byte 255 mid-codepoint
        // (boundaries fall at multiples of 4), so a naive byte slice here
        // would panic.
        let long_id = "💥".repeat(100);
        let ctx = CallContext::new().with_operation_id(long_id);
        let truncated = derive_operation_id(&ctx, None);
        assert!(truncated.len() <= MAX_OPERATION_ID_LEN);
        assert!(truncated.chars().all(|c| c == '💥'));
    }
}
