//! Metrics interceptor
//!
//! Times each before/after pair keyed by `(family, name)` and aggregates
//! durations, error counts, and token usage per operation family.

use super::{keys, HookEvent, Interceptor};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tooling::CancelToken;

/// One completed operation.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    /// Operation family: `tool`, `model`, `node`, `session`, `context`.
    pub kind: String,
    pub name: String,
    pub duration: Duration,
    pub error: bool,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Aggregates for one operation family.
#[derive(Debug, Clone, Default)]
pub struct FamilySummary {
    pub count: u64,
    pub errors: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl FamilySummary {
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

/// Summary across all families.
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub per_kind: HashMap<String, FamilySummary>,
}

impl MetricsSummary {
    pub fn total_count(&self) -> u64 {
        self.per_kind.values().map(|s| s.count).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.per_kind.values().map(|s| s.errors).sum()
    }
}

#[derive(Default)]
struct MetricsInner {
    starts: HashMap<(String, String), Instant>,
    records: Vec<MetricRecord>,
}

/// Duration/error/token metrics over intercepted operations.
#[derive(Default)]
pub struct MetricsInterceptor {
    inner: Mutex<MetricsInner>,
}

impl MetricsInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// All completed records, in completion order.
    pub fn metrics(&self) -> Vec<MetricRecord> {
        self.inner.lock().records.clone()
    }

    /// Aggregates per operation family.
    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock();
        let mut summary = MetricsSummary::default();

        for record in &inner.records {
            let family = summary.per_kind.entry(record.kind.clone()).or_default();
            family.count += 1;
            if record.error {
                family.errors += 1;
            }
            family.total_duration += record.duration;
            family.max_duration = family.max_duration.max(record.duration);
            family.prompt_tokens += record.prompt_tokens;
            family.completion_tokens += record.completion_tokens;
        }
        summary
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn before(&self, _cancel: &CancelToken, event: &mut HookEvent) -> Result<()> {
        if event.event_type.is_before() {
            let key = (event.event_type.family().to_string(), event.name.clone());
            self.inner.lock().starts.insert(key, Instant::now());
        }
        Ok(())
    }

    async fn after(&self, event: &mut HookEvent) -> Result<()> {
        if event.event_type.is_before() {
            return Ok(());
        }

        let key = (event.event_type.family().to_string(), event.name.clone());
        let mut inner = self.inner.lock();
        let duration = inner
            .starts
            .remove(&key)
            .map(|start| start.elapsed())
            .unwrap_or(Duration::ZERO);

        let prompt_tokens = event.int(keys::PROMPT_TOKENS).unwrap_or(0).max(0) as u64;
        let completion_tokens = event.int(keys::COMPLETION_TOKENS).unwrap_or(0).max(0) as u64;

        inner.records.push(MetricRecord {
            kind: key.0,
            name: key.1,
            duration,
            error: event.error.is_some(),
            prompt_tokens,
            completion_tokens,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::EventType;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_paired_operations() {
        let metrics = MetricsInterceptor::new();
        let cancel = CancelToken::new();

        let mut before = HookEvent::new(EventType::ModelBefore, "mock");
        metrics.before(&cancel, &mut before).await.unwrap();

        let mut after = HookEvent::new(EventType::ModelAfter, "mock")
            .with_metadata(keys::PROMPT_TOKENS, json!(100))
            .with_metadata(keys::COMPLETION_TOKENS, json!(20));
        metrics.after(&mut after).await.unwrap();

        let records = metrics.metrics();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "model");
        assert_eq!(records[0].name, "mock");
        assert!(!records[0].error);
        assert_eq!(records[0].prompt_tokens, 100);
        assert_eq!(records[0].completion_tokens, 20);
    }

    #[tokio::test]
    async fn test_summary_aggregates_by_family() {
        let metrics = MetricsInterceptor::new();
        let cancel = CancelToken::new();

        for name in ["add", "sub"] {
            let mut before = HookEvent::new(EventType::ToolBefore, name);
            metrics.before(&cancel, &mut before).await.unwrap();
            let mut after = HookEvent::new(EventType::ToolAfter, name);
            metrics.after(&mut after).await.unwrap();
        }

        let mut failed = HookEvent::new(EventType::ToolAfter, "bad");
        failed.error = Some("boom".to_string());
        metrics.after(&mut failed).await.unwrap();

        let summary = metrics.summary();
        let tools = summary.per_kind.get("tool").unwrap();
        assert_eq!(tools.count, 3);
        assert_eq!(tools.errors, 1);
        assert_eq!(summary.total_count(), 3);
        assert_eq!(summary.total_errors(), 1);
    }

    #[tokio::test]
    async fn test_unpaired_after_gets_zero_duration() {
        let metrics = MetricsInterceptor::new();

        let mut after = HookEvent::new(EventType::ModelAfter, "orphan");
        metrics.after(&mut after).await.unwrap();

        let records = metrics.metrics();
        assert_eq!(records[0].duration, Duration::ZERO);
    }
}
