//! Rate-limit interceptor
//!
//! Token-bucket gating per provider on `model.before`, for both
//! requests-per-minute and (optionally) tokens-per-minute. In
//! [`RateLimitMode::FailFast`] an empty bucket rejects immediately with
//! `rate-limit-exceeded`; in [`RateLimitMode::Wait`] the call sleeps until
//! the deficit refills, interruptible through the caller's cancellation
//! token.

use super::{keys, EventType, HookEvent, Interceptor};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tooling::rate_limit::RateLimitError;
use tooling::{CancelToken, TokenBucket};

/// What to do when a bucket is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitMode {
    /// Fail immediately with `rate-limit-exceeded`.
    FailFast,
    /// Sleep until the deficit refills (cancellable).
    Wait,
}

#[derive(Clone)]
struct ProviderBuckets {
    requests: TokenBucket,
    tokens: Option<TokenBucket>,
}

/// Per-provider request/token budgets.
pub struct RateLimitInterceptor {
    mode: RateLimitMode,
    requests_per_minute: f64,
    tokens_per_minute: Option<f64>,
    buckets: Mutex<HashMap<String, ProviderBuckets>>,
}

impl RateLimitInterceptor {
    pub fn new(mode: RateLimitMode, requests_per_minute: f64) -> Self {
        Self {
            mode,
            requests_per_minute,
            tokens_per_minute: None,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Also budget estimated tokens per minute.
    pub fn with_tokens_per_minute(mut self, tokens_per_minute: f64) -> Self {
        self.tokens_per_minute = Some(tokens_per_minute);
        self
    }

    fn buckets_for(&self, provider: &str) -> ProviderBuckets {
        let mut buckets = self.buckets.lock();
        buckets
            .entry(provider.to_string())
            .or_insert_with(|| ProviderBuckets {
                requests: TokenBucket::per_minute(self.requests_per_minute),
                tokens: self.tokens_per_minute.map(TokenBucket::per_minute),
            })
            .clone()
    }

    async fn draw(
        &self,
        cancel: &CancelToken,
        provider: &str,
        bucket: &TokenBucket,
        amount: f64,
    ) -> Result<()> {
        match self.mode {
            RateLimitMode::FailFast => {
                if bucket.try_consume(amount).await {
                    Ok(())
                } else {
                    Err(CoreError::RateLimitExceeded(provider.to_string()))
                }
            }
            RateLimitMode::Wait => bucket.consume(amount, cancel).await.map_err(|e| match e {
                RateLimitError::Cancelled => CoreError::Cancelled,
            }),
        }
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn before(&self, cancel: &CancelToken, event: &mut HookEvent) -> Result<()> {
        if event.event_type != EventType::ModelBefore {
            return Ok(());
        }
        // Cached responses make no provider call.
        if event.flag(keys::CACHE_HIT) {
            return Ok(());
        }

        let buckets = self.buckets_for(&event.name);
        self.draw(cancel, &event.name, &buckets.requests, 1.0).await?;

        if let Some(token_bucket) = &buckets.tokens {
            let estimated = event.int(keys::ESTIMATED_TOKENS).unwrap_or(0).max(0) as f64;
            if estimated > 0.0 {
                self.draw(cancel, &event.name, token_bucket, estimated).await?;
            }
        }
        Ok(())
    }
}
