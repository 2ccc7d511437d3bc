//! Exponential backoff policy
//!
//! Pure delay arithmetic for retry decisions. The policy does not execute
//! anything itself; the retry interceptor records the desired delay and the
//! agent loop re-issues the call.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter.
///
/// Delay for attempt `n` (1-based) is
/// `min(max_delay, base_delay * 2^(n-1))` scaled by a uniform jitter factor
/// in `[0.75, 1.25]` when jitter is enabled.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BackoffPolicy {
    /// Maximum number of retry attempts.
    pub max_retries: u32,

    /// Initial delay in milliseconds.
    pub base_delay_ms: u64,

    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,

    /// Whether to apply +/-25% jitter.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with a custom retry cap.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the initial delay.
    pub fn with_base_delay(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether `attempt` (1-based) exceeds the retry budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(62);
        let raw = self.base_delay_ms.saturating_mul(1u64 << exp);
        let capped = raw.min(self.max_delay_ms) as f64;

        let scaled = if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
            capped * factor
        } else {
            capped
        };

        Duration::from_millis(scaled as u64)
    }
}
