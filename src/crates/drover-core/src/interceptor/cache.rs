//! Response cache interceptor
//!
//! Caches model responses keyed by `(provider, sha256(canonical request))`.
//! On `model.before`, a fresh hit marks the event with
//! [`keys::CACHE_HIT`](super::keys::CACHE_HIT) and stashes the cached output
//! under [`keys::CACHED_OUTPUT`](super::keys::CACHED_OUTPUT); the agent loop
//! short-circuits the provider call when it sees the flag. Streaming requests
//! and responses that were themselves cache hits are never stored.

use super::{keys, EventType, HookEvent, Interceptor};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tooling::CancelToken;
use tracing::debug;

struct CacheEntry {
    output: Value,
    created_at: Instant,
}

/// TTL-bounded response cache.
pub struct CacheInterceptor {
    ttl: Duration,
    max_entries: Option<usize>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheInterceptor {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_entries: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cap the number of entries; the oldest by creation time is evicted.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Number of live entries. Test helper.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn key(provider: &str, input: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(provider.as_bytes());
        hasher.update(b"\0");
        let mut canonical = String::new();
        write_canonical(input, &mut canonical);
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn is_stream_request(input: &Value) -> bool {
        input
            .get("stream")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Serialize a value with object keys in sorted order, so logically equal
/// requests hash identically regardless of map iteration order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    fn name(&self) -> &str {
        "cache"
    }

    async fn before(&self, _cancel: &CancelToken, event: &mut HookEvent) -> Result<()> {
        if event.event_type != EventType::ModelBefore {
            return Ok(());
        }
        let Some(input) = &event.input else {
            return Ok(());
        };
        if Self::is_stream_request(input) {
            return Ok(());
        }

        let key = Self::key(&event.name, input);
        let hit = {
            let entries = self.entries.lock();
            entries
                .get(&key)
                .filter(|entry| entry.created_at.elapsed() < self.ttl)
                .map(|entry| entry.output.clone())
        };

        if let Some(output) = hit {
            debug!(provider = %event.name, "model cache hit");
            event.metadata.insert(keys::CACHE_HIT.to_string(), Value::Bool(true));
            event.metadata.insert(keys::CACHED_OUTPUT.to_string(), output);
        }
        Ok(())
    }

    async fn after(&self, event: &mut HookEvent) -> Result<()> {
        if event.event_type != EventType::ModelAfter || event.error.is_some() {
            return Ok(());
        }
        // Never re-store a response that was itself served from cache.
        if event.flag(keys::CACHE_HIT) {
            return Ok(());
        }
        let (Some(input), Some(output)) = (&event.input, &event.output) else {
            return Ok(());
        };
        if Self::is_stream_request(input) {
            return Ok(());
        }

        let key = Self::key(&event.name, input);
        let mut entries = self.entries.lock();
        entries.insert(
            key,
            CacheEntry {
                output: output.clone(),
                created_at: Instant::now(),
            },
        );

        if let Some(cap) = self.max_entries {
            while entries.len() > cap {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.created_at)
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(key) => {
                        entries.remove(&key);
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn before_event(input: Value) -> HookEvent {
        HookEvent::new(EventType::ModelBefore, "mock").with_input(input)
    }

    fn after_event(input: Value, output: Value) -> HookEvent {
        let mut event = HookEvent::new(EventType::ModelAfter, "mock").with_input(input);
        event.output = Some(output);
        event
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = CacheInterceptor::new(Duration::from_secs(60));
        let cancel = CancelToken::new();
        let input = json!({"messages": [{"role": "user", "content": "hi"}]});

        let mut before = before_event(input.clone());
        cache.before(&cancel, &mut before).await.unwrap();
        assert!(!before.flag(keys::CACHE_HIT));

        let mut after = after_event(input.clone(), json!({"content": "hello"}));
        cache.after(&mut after).await.unwrap();

        let mut before = before_event(input);
        cache.before(&cancel, &mut before).await.unwrap();
        assert!(before.flag(keys::CACHE_HIT));
        assert_eq!(
            before.metadata.get(keys::CACHED_OUTPUT).unwrap(),
            &json!({"content": "hello"})
        );
    }

    #[tokio::test]
    async fn test_key_ignores_object_key_order() {
        let cache = CacheInterceptor::new(Duration::from_secs(60));
        let cancel = CancelToken::new();

        let mut after = after_event(json!({"a": 1, "b": 2}), json!({"content": "x"}));
        cache.after(&mut after).await.unwrap();

        // Same request with keys spelled in the opposite order.
        let mut before = before_event(json!({"b": 2, "a": 1}));
        cache.before(&cancel, &mut before).await.unwrap();
        assert!(before.flag(keys::CACHE_HIT));
    }

    #[tokio::test]
    async fn test_expired_entry_misses() {
        let cache = CacheInterceptor::new(Duration::from_millis(10));
        let cancel = CancelToken::new();
        let input = json!({"q": 1});

        let mut after = after_event(input.clone(), json!({"content": "x"}));
        cache.after(&mut after).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut before = before_event(input);
        cache.before(&cancel, &mut before).await.unwrap();
        assert!(!before.flag(keys::CACHE_HIT));
    }

    #[tokio::test]
    async fn test_stream_requests_bypass_cache() {
        let cache = CacheInterceptor::new(Duration::from_secs(60));
        let cancel = CancelToken::new();
        let input = json!({"stream": true, "q": 1});

        let mut after = after_event(input.clone(), json!({"content": "x"}));
        cache.after(&mut after).await.unwrap();
        assert!(cache.is_empty());

        let mut before = before_event(input);
        cache.before(&cancel, &mut before).await.unwrap();
        assert!(!before.flag(keys::CACHE_HIT));
    }

    #[tokio::test]
    async fn test_cache_hits_are_not_restored() {
        let cache = CacheInterceptor::new(Duration::from_secs(60));

        let mut after = after_event(json!({"q": 1}), json!({"content": "x"}));
        after
            .metadata
            .insert(keys::CACHE_HIT.to_string(), Value::Bool(true));
        cache.after(&mut after).await.unwrap();

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = CacheInterceptor::new(Duration::from_secs(60));

        let mut after = after_event(json!({"q": 1}), json!({"content": "x"}));
        after.error = Some("boom".to_string());
        cache.after(&mut after).await.unwrap();

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_max_entries_evicts_oldest() {
        let cache = CacheInterceptor::new(Duration::from_secs(60)).with_max_entries(2);
        let cancel = CancelToken::new();

        for i in 0..3 {
            let mut after = after_event(json!({ "q": i }), json!({ "content": i }));
            cache.after(&mut after).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(cache.len(), 2);

        // The first entry was evicted; the latest survives.
        let mut before = before_event(json!({"q": 0}));
        cache.before(&cancel, &mut before).await.unwrap();
        assert!(!before.flag(keys::CACHE_HIT));

        let mut before = before_event(json!({"q": 2}));
        cache.before(&cancel, &mut before).await.unwrap();
        assert!(before.flag(keys::CACHE_HIT));
    }
}
