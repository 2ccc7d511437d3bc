//! Interception chain for tool, model, and node events
//!
//! Every model, tool, and node invocation flows through an ordered chain of
//! [`Interceptor`]s. `before` hooks run in registration order and may abort
//! the wrapped operation by returning an error; `after` hooks run in reverse
//! registration order (stack unwind) and can only observe. An after-error
//! following a successful operation is logged, never surfaced - a live
//! operational error always wins.
//!
//! Interceptors communicate with the agent loop through event metadata: the
//! cache marks hits with [`keys::CACHE_HIT`], the retry hook records the
//! desired delay under [`keys::RETRY_DELAY_MS`], and so on. The chain itself
//! holds no locks across interceptor code, so an interceptor is free to make
//! nested calls.

pub mod cache;
pub mod cost;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod retry;

pub use cache::CacheInterceptor;
pub use cost::{CostInterceptor, CostTotals, ModelPrice};
pub use logging::LoggingInterceptor;
pub use metrics::{MetricRecord, MetricsInterceptor, MetricsSummary};
pub use rate_limit::{RateLimitInterceptor, RateLimitMode};
pub use retry::RetryInterceptor;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tooling::CancelToken;
use tracing::warn;

/// Well-known metadata keys exchanged between interceptors and the agent.
pub mod keys {
    pub const CACHE_HIT: &str = "cache_hit";
    pub const CACHED_OUTPUT: &str = "cached_output";
    pub const RETRY: &str = "retry";
    pub const RETRY_ATTEMPT: &str = "retry_attempt";
    pub const RETRY_DELAY_MS: &str = "retry_delay_ms";
    pub const SESSION_ID: &str = "session_id";
    pub const MODEL: &str = "model";
    pub const PROMPT_TOKENS: &str = "prompt_tokens";
    pub const COMPLETION_TOKENS: &str = "completion_tokens";
    pub const ESTIMATED_TOKENS: &str = "estimated_tokens";
    pub const CONTEXT_LIMIT: &str = "context_limit";
    pub const SUMMARY_LENGTH: &str = "summary_length";
    pub const PRESERVED_MESSAGES: &str = "preserved_messages";
}

/// The kind of operation an event wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ToolBefore,
    ToolAfter,
    ModelBefore,
    ModelAfter,
    NodeBefore,
    NodeAfter,
    SessionStart,
    SessionEnd,
    ContextOverflow,
    ContextSummarize,
}

impl EventType {
    /// Wire name, e.g. `model.before`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ToolBefore => "tool.before",
            EventType::ToolAfter => "tool.after",
            EventType::ModelBefore => "model.before",
            EventType::ModelAfter => "model.after",
            EventType::NodeBefore => "node.before",
            EventType::NodeAfter => "node.after",
            EventType::SessionStart => "session.start",
            EventType::SessionEnd => "session.end",
            EventType::ContextOverflow => "context.overflow",
            EventType::ContextSummarize => "context.summarize",
        }
    }

    /// Operation family shared by the before/after pair, e.g. `model`.
    pub fn family(&self) -> &'static str {
        match self {
            EventType::ToolBefore | EventType::ToolAfter => "tool",
            EventType::ModelBefore | EventType::ModelAfter => "model",
            EventType::NodeBefore | EventType::NodeAfter => "node",
            EventType::SessionStart | EventType::SessionEnd => "session",
            EventType::ContextOverflow | EventType::ContextSummarize => "context",
        }
    }

    /// Whether this is a `*.before`-side event.
    pub fn is_before(&self) -> bool {
        matches!(
            self,
            EventType::ToolBefore
                | EventType::ModelBefore
                | EventType::NodeBefore
                | EventType::SessionStart
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event flowing through the chain.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub event_type: EventType,

    /// Operation name: provider name for model events, tool name for tool
    /// events, graph/node id for node events.
    pub name: String,

    pub input: Option<Value>,
    pub output: Option<Value>,

    /// Operational error message, set on after-events of failed operations.
    pub error: Option<String>,

    /// Free-form metadata; interceptors read and write it.
    pub metadata: HashMap<String, Value>,
}

impl HookEvent {
    pub fn new(event_type: EventType, name: impl Into<String>) -> Self {
        Self {
            event_type,
            name: name.into(),
            input: None,
            output: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read a boolean metadata flag, defaulting to false.
    pub fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Read an integer metadata value.
    pub fn int(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(|v| v.as_i64())
    }
}

/// A before/after observer of tool, model, and node events.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Runs before the wrapped operation. Returning an error aborts the
    /// chain; the operation is skipped and the error surfaces to the caller.
    async fn before(&self, cancel: &CancelToken, event: &mut HookEvent) -> Result<()> {
        let _ = (cancel, event);
        Ok(())
    }

    /// Runs after the wrapped operation, successful or not.
    async fn after(&self, event: &mut HookEvent) -> Result<()> {
        let _ = event;
        Ok(())
    }
}

/// Ordered composition of interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor. Registration order is before-order.
    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run `before` hooks in registration order.
    ///
    /// The first error aborts the remaining hooks and is returned; the caller
    /// must skip the wrapped operation.
    pub async fn before(&self, cancel: &CancelToken, event: &mut HookEvent) -> Result<()> {
        for interceptor in &self.interceptors {
            interceptor.before(cancel, event).await?;
        }
        Ok(())
    }

    /// Run `after` hooks in reverse registration order.
    ///
    /// Hook errors are logged and swallowed so they can never mask the
    /// operational outcome.
    pub async fn after(&self, event: &mut HookEvent) {
        for interceptor in self.interceptors.iter().rev() {
            if let Err(e) = interceptor.after(event).await {
                warn!(
                    interceptor = interceptor.name(),
                    event = %event.event_type,
                    error = %e,
                    "after-interceptor failed"
                );
            }
        }
    }

    /// Emit an observational event (context.*, session.*) through the chain.
    ///
    /// Both sides run; before-errors are logged rather than surfaced since
    /// there is no operation to abort.
    pub async fn emit(&self, cancel: &CancelToken, event: &mut HookEvent) {
        if let Err(e) = self.before(cancel, event).await {
            warn!(event = %event.event_type, error = %e, "interceptor rejected emitted event");
        }
        self.after(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use parking_lot::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_before: bool,
        fail_after: bool,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn before(&self, _cancel: &CancelToken, _event: &mut HookEvent) -> Result<()> {
            self.log.lock().push(format!("{}:before", self.label));
            if self.fail_before {
                return Err(CoreError::Configuration("nope".to_string()));
            }
            Ok(())
        }

        async fn after(&self, _event: &mut HookEvent) -> Result<()> {
            self.log.lock().push(format!("{}:after", self.label));
            if self.fail_after {
                return Err(CoreError::Configuration("after failed".to_string()));
            }
            Ok(())
        }
    }

    fn recorder(
        label: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn Interceptor> {
        Arc::new(Recorder {
            label,
            log: log.clone(),
            fail_before: false,
            fail_after: false,
        })
    }

    #[tokio::test]
    async fn test_before_in_order_after_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new()
            .with(recorder("a", &log))
            .with(recorder("b", &log))
            .with(recorder("c", &log));

        let cancel = CancelToken::new();
        let mut event = HookEvent::new(EventType::ModelBefore, "test");
        chain.before(&cancel, &mut event).await.unwrap();
        chain.after(&mut event).await;

        assert_eq!(
            *log.lock(),
            vec![
                "a:before", "b:before", "c:before", "c:after", "b:after", "a:after"
            ]
        );
    }

    #[tokio::test]
    async fn test_before_error_aborts_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new()
            .with(recorder("a", &log))
            .with(Arc::new(Recorder {
                label: "bad",
                log: log.clone(),
                fail_before: true,
                fail_after: false,
            }))
            .with(recorder("c", &log));

        let cancel = CancelToken::new();
        let mut event = HookEvent::new(EventType::ToolBefore, "test");
        let err = chain.before(&cancel, &mut event).await.unwrap_err();

        assert!(matches!(err, CoreError::Configuration(_)));
        assert_eq!(*log.lock(), vec!["a:before", "bad:before"]);
    }

    #[tokio::test]
    async fn test_after_errors_are_swallowed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new()
            .with(recorder("a", &log))
            .with(Arc::new(Recorder {
                label: "bad",
                log: log.clone(),
                fail_before: false,
                fail_after: true,
            }));

        let mut event = HookEvent::new(EventType::ModelAfter, "test");
        chain.after(&mut event).await;

        // Both ran despite the failure.
        assert_eq!(*log.lock(), vec!["bad:after", "a:after"]);
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::ModelBefore.as_str(), "model.before");
        assert_eq!(EventType::ContextOverflow.as_str(), "context.overflow");
        assert_eq!(EventType::ToolAfter.family(), "tool");
        assert!(EventType::SessionStart.is_before());
        assert!(!EventType::ModelAfter.is_before());
    }
}
