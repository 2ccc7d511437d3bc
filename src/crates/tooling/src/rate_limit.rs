//! Token-bucket rate limiting
//!
//! Provides a weighted token bucket used to cap requests-per-minute and
//! tokens-per-minute against LLM providers. Tokens refill continuously at
//! `capacity / period`; consumption is lock-serialized so concurrent callers
//! never over-draw the bucket.

use crate::cancel::CancelToken;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from waiting on a bucket.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The wait for capacity was cancelled before tokens became available.
    #[error("rate limit wait cancelled")]
    Cancelled,
}

/// Weighted token bucket.
///
/// Unlike a plain request counter, a draw may consume several tokens at once
/// (e.g. the estimated token count of a model request against a
/// tokens-per-minute budget).
///
/// # Example
///
/// ```rust,ignore
/// use tooling::TokenBucket;
///
/// // 60 requests per minute
/// let bucket = TokenBucket::per_minute(60.0);
///
/// if bucket.try_consume(1.0).await {
///     // proceed
/// }
/// ```
#[derive(Clone)]
pub struct TokenBucket {
    state: Arc<Mutex<BucketState>>,
}

struct BucketState {
    /// Maximum number of tokens the bucket holds.
    capacity: f64,

    /// Current token balance (fractional while refilling).
    tokens: f64,

    /// Refill rate in tokens per second.
    refill_per_sec: f64,

    /// Last refill time.
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }
}

impl TokenBucket {
    /// Create a bucket with the given capacity and refill period.
    ///
    /// The bucket starts full and refills continuously at
    /// `capacity / period`.
    pub fn new(capacity: f64, period: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BucketState {
                capacity,
                tokens: capacity,
                refill_per_sec: capacity / period.as_secs_f64(),
                last_refill: Instant::now(),
            })),
        }
    }

    /// Convenience constructor for per-minute budgets.
    pub fn per_minute(capacity: f64) -> Self {
        Self::new(capacity, Duration::from_secs(60))
    }

    /// Attempt to consume `n` tokens without waiting.
    ///
    /// Returns `false` (and leaves the bucket untouched) when the balance is
    /// insufficient.
    pub async fn try_consume(&self, n: f64) -> bool {
        let mut state = self.state.lock().await;
        state.refill();

        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Time until `n` tokens will be available, assuming no other draws.
    ///
    /// Returns `Duration::ZERO` when the draw can proceed immediately.
    pub async fn wait_time(&self, n: f64) -> Duration {
        let mut state = self.state.lock().await;
        state.refill();

        if state.tokens >= n {
            Duration::ZERO
        } else {
            let deficit = n - state.tokens;
            Duration::from_secs_f64(deficit / state.refill_per_sec)
        }
    }

    /// Consume `n` tokens, sleeping until the balance allows it.
    ///
    /// The sleep is sized from the current deficit and the refill rate, and
    /// is interruptible through `cancel`.
    pub async fn consume(&self, n: f64, cancel: &CancelToken) -> Result<(), RateLimitError> {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                state.refill();

                if state.tokens >= n {
                    state.tokens -= n;
                    return Ok(());
                }

                let deficit = n - state.tokens;
                Duration::from_secs_f64(deficit / state.refill_per_sec)
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Current token balance after refill.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill();
        state.tokens
    }
}
