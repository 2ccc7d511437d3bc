//! Retry policy interceptor
//!
//! Observes `model.after`. On a retryable failure it records the desired
//! retry in event metadata (`retry`, `retry_attempt`, `retry_delay_ms`); the
//! agent loop performs the actual re-issue, since a hook cannot re-enter the
//! provider. Backoff arithmetic lives in [`tooling::retry::BackoffPolicy`].

use super::{keys, EventType, HookEvent, Interceptor};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tooling::BackoffPolicy;
use tracing::debug;

/// Classifies whether an error message is worth retrying.
pub type RetryClassifier = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Marks failed model calls for retry with exponential backoff.
pub struct RetryInterceptor {
    policy: BackoffPolicy,
    classifier: Option<RetryClassifier>,
}

impl RetryInterceptor {
    /// All errors retryable, default backoff.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            classifier: None,
        }
    }

    /// Install a predicate deciding which errors are retryable.
    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    fn name(&self) -> &str {
        "retry"
    }

    async fn after(&self, event: &mut HookEvent) -> Result<()> {
        if event.event_type != EventType::ModelAfter {
            return Ok(());
        }
        let Some(error) = &event.error else {
            return Ok(());
        };

        let retryable = match &self.classifier {
            Some(classify) => classify(error),
            None => true,
        };
        if !retryable {
            return Ok(());
        }

        // Retries already performed, carried across attempts by the agent.
        let attempts = event.int(keys::RETRY_ATTEMPT).unwrap_or(0).max(0) as u32;
        let next = attempts + 1;
        if self.policy.is_exhausted(next) {
            debug!(name = %event.name, attempts, "retry budget exhausted");
            return Ok(());
        }

        let delay = self.policy.delay_for(next);
        event.metadata.insert(keys::RETRY.to_string(), Value::Bool(true));
        event
            .metadata
            .insert(keys::RETRY_ATTEMPT.to_string(), json!(next));
        event
            .metadata
            .insert(keys::RETRY_DELAY_MS.to_string(), json!(delay.as_millis() as u64));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_after(attempts: i64) -> HookEvent {
        let mut event = HookEvent::new(EventType::ModelAfter, "mock");
        event.error = Some("connection reset".to_string());
        if attempts > 0 {
            event
                .metadata
                .insert(keys::RETRY_ATTEMPT.to_string(), json!(attempts));
        }
        event
    }

    #[tokio::test]
    async fn test_marks_first_retry() {
        let retry = RetryInterceptor::new(BackoffPolicy::default().with_jitter(false));
        let mut event = failed_after(0);

        retry.after(&mut event).await.unwrap();

        assert!(event.flag(keys::RETRY));
        assert_eq!(event.int(keys::RETRY_ATTEMPT), Some(1));
        assert_eq!(event.int(keys::RETRY_DELAY_MS), Some(1_000));
    }

    #[tokio::test]
    async fn test_delay_grows_with_attempts() {
        let retry = RetryInterceptor::new(BackoffPolicy::default().with_jitter(false));
        let mut event = failed_after(2);

        retry.after(&mut event).await.unwrap();

        assert_eq!(event.int(keys::RETRY_ATTEMPT), Some(3));
        assert_eq!(event.int(keys::RETRY_DELAY_MS), Some(4_000));
    }

    #[tokio::test]
    async fn test_caps_at_max_retries() {
        let retry = RetryInterceptor::new(BackoffPolicy::new(2));
        let mut event = failed_after(2);

        retry.after(&mut event).await.unwrap();

        assert!(!event.flag(keys::RETRY));
    }

    #[tokio::test]
    async fn test_successful_call_not_marked() {
        let retry = RetryInterceptor::new(BackoffPolicy::default());
        let mut event = HookEvent::new(EventType::ModelAfter, "mock");

        retry.after(&mut event).await.unwrap();

        assert!(!event.flag(keys::RETRY));
    }

    #[tokio::test]
    async fn test_classifier_filters_permanent_errors() {
        let retry = RetryInterceptor::new(BackoffPolicy::default())
            .with_classifier(Arc::new(|msg| !msg.contains("unauthorized")));

        let mut event = HookEvent::new(EventType::ModelAfter, "mock");
        event.error = Some("401 unauthorized".to_string());
        retry.after(&mut event).await.unwrap();
        assert!(!event.flag(keys::RETRY));

        let mut event = failed_after(0);
        retry.after(&mut event).await.unwrap();
        assert!(event.flag(keys::RETRY));
    }
}
