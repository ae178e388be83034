//! Request context: correlation ids, cancellation, and hook-shared values
//!
//! The context travels with a request through pre-hooks, dispatch and
//! post-hooks. Correlation ids are first-class fields; everything else
//! lives in a string-keyed map of typed values with defensive getters
//! that return `None` on a type mismatch instead of panicking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use uuid::Uuid;

/// Well-known context key names, shared process-wide
pub mod keys {
    /// Canonical request id
    pub const REQUEST_ID: &str = "request-id";
    /// Original request id of a fallback attempt
    pub const PARENT_REQUEST_ID: &str = "parent-request-id";
    /// Request id assigned to the fallback attempt itself
    pub const FALLBACK_REQUEST_ID: &str = "fallback-request-id";
    /// Zero-based index into the fallback cascade
    pub const FALLBACK_INDEX: &str = "fallback-index";
    /// Current span id
    pub const SPAN_ID: &str = "span-id";
    /// Incoming W3C traceparent parent span id
    pub const PARENT_SPAN_ID: &str = "parent-span-id";
    /// Trace id
    pub const TRACE_ID: &str = "trace-id";
    /// Streaming accumulator id
    pub const ACCUMULATOR_ID: &str = "accumulator-id";
    /// Marks the synthetic end-of-stream chunk
    pub const STREAM_END_INDICATOR: &str = "stream-end-indicator";
    /// Id of the credential chosen by key selection
    pub const SELECTED_KEY_ID: &str = "selected-key-id";
    /// Caller-facing virtual key id
    pub const VIRTUAL_KEY_ID: &str = "virtual-key-id";
    /// Routing engines that touched the request
    pub const ROUTING_ENGINES_USED: &str = "routing-engines-used";
    /// Whether the request was accepted asynchronously
    pub const IS_ASYNC_REQUEST: &str = "is-async-request";
}

/// A typed context value
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    /// String value
    Str(String),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// Arbitrary JSON value
    Json(serde_json::Value),
}

/// Cooperative cancellation shared between the caller and in-flight work
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a live token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel: wakes every pending `cancelled().await`
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Mutable per-request context threaded through the plugin pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    cancel: CancelToken,
    values: HashMap<String, ContextValue>,
}

impl RequestContext {
    /// Create a context with a fresh request id
    pub fn new() -> Self {
        Self::with_request_id(Uuid::new_v4().to_string())
    }

    /// Create a context for an externally assigned request id
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let mut values = HashMap::new();
        values.insert(
            keys::REQUEST_ID.to_string(),
            ContextValue::Str(request_id.clone()),
        );
        Self {
            request_id,
            cancel: CancelToken::new(),
            values,
        }
    }

    /// The canonical request id
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The cancellation token for this request
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Derive the context for a fallback attempt: fresh request id,
    /// original id recorded as parent, shared cancellation.
    pub fn derive_fallback(&self, fallback_index: usize) -> Self {
        let mut derived = self.clone();
        let fallback_id = Uuid::new_v4().to_string();
        derived.values.insert(
            keys::PARENT_REQUEST_ID.to_string(),
            ContextValue::Str(self.request_id.clone()),
        );
        derived.values.insert(
            keys::FALLBACK_REQUEST_ID.to_string(),
            ContextValue::Str(fallback_id.clone()),
        );
        derived.values.insert(
            keys::FALLBACK_INDEX.to_string(),
            ContextValue::Int(fallback_index as i64),
        );
        derived.values.insert(
            keys::REQUEST_ID.to_string(),
            ContextValue::Str(fallback_id.clone()),
        );
        derived.request_id = fallback_id;
        derived
    }

    /// Set a value
    pub fn set(&mut self, key: impl Into<String>, value: ContextValue) {
        self.values.insert(key.into(), value);
    }

    /// Remove a value, returning it if present
    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.values.remove(key)
    }

    /// Raw value lookup
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    /// String value, `None` on absence or type mismatch
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ContextValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer value, `None` on absence or type mismatch
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ContextValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Float value; integers widen, `None` otherwise
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(ContextValue::Float(f)) => Some(*f),
            Some(ContextValue::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// Boolean value, `None` on absence or type mismatch
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(ContextValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// JSON value, `None` on absence or type mismatch
    pub fn get_json(&self, key: &str) -> Option<&serde_json::Value> {
        match self.values.get(key) {
            Some(ContextValue::Json(v)) => Some(v),
            _ => None,
        }
    }

    /// Parent request id, set on fallback attempts
    pub fn parent_request_id(&self) -> Option<&str> {
        self.get_str(keys::PARENT_REQUEST_ID)
    }

    /// Fallback index, 0 for the primary attempt
    pub fn fallback_index(&self) -> usize {
        self.get_int(keys::FALLBACK_INDEX).unwrap_or(0) as usize
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters_reject_mismatches() {
        let mut ctx = RequestContext::new();
        ctx.set("count", ContextValue::Int(3));
        assert_eq!(ctx.get_int("count"), Some(3));
        assert_eq!(ctx.get_str("count"), None);
        assert_eq!(ctx.get_bool("count"), None);
        assert_eq!(ctx.get_float("count"), Some(3.0));
        assert_eq!(ctx.get_int("missing"), None);
    }

    #[test]
    fn test_fallback_derivation_links_parent() {
        let ctx = RequestContext::new();
        let original_id = ctx.request_id().to_string();

        let derived = ctx.derive_fallback(1);
        assert_ne!(derived.request_id(), original_id);
        assert_eq!(derived.parent_request_id(), Some(original_id.as_str()));
        assert_eq!(derived.fallback_index(), 1);
        // cancellation is shared with the original attempt
        ctx.cancel_token().cancel();
        assert!(derived.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        token.cancel();
        assert!(handle.await.unwrap());
    }
}
