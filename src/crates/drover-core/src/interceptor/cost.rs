//! Cost accounting interceptor
//!
//! Accumulates token counts and dollar spend per model call, globally and per
//! session, from a price table keyed by model id. Once cumulative spend
//! reaches the configured budget, every subsequent `model.before` aborts with
//! `budget-exceeded` and no provider call occurs.

use super::{keys, EventType, HookEvent, Interceptor};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tooling::CancelToken;
use tracing::debug;

/// Dollar prices per 1000 tokens for one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

/// Accumulated spend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub dollars: f64,
}

#[derive(Default)]
struct CostInner {
    global: CostTotals,
    per_session: HashMap<String, CostTotals>,
}

/// Tracks spend against a price table and enforces an optional budget.
pub struct CostInterceptor {
    prices: HashMap<String, ModelPrice>,
    budget: Option<f64>,
    inner: Mutex<CostInner>,
}

impl CostInterceptor {
    pub fn new(prices: HashMap<String, ModelPrice>) -> Self {
        Self {
            prices,
            budget: None,
            inner: Mutex::new(CostInner::default()),
        }
    }

    /// Abort model calls once global spend reaches `budget` dollars.
    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Global totals so far.
    pub fn totals(&self) -> CostTotals {
        self.inner.lock().global
    }

    /// Totals attributed to one session.
    pub fn session_totals(&self, session_id: &str) -> Option<CostTotals> {
        self.inner.lock().per_session.get(session_id).copied()
    }
}

#[async_trait]
impl Interceptor for CostInterceptor {
    fn name(&self) -> &str {
        "cost"
    }

    async fn before(&self, _cancel: &CancelToken, event: &mut HookEvent) -> Result<()> {
        if event.event_type != EventType::ModelBefore {
            return Ok(());
        }
        if let Some(budget) = self.budget {
            let spent = self.inner.lock().global.dollars;
            if spent >= budget {
                return Err(CoreError::BudgetExceeded { spent, budget });
            }
        }
        Ok(())
    }

    async fn after(&self, event: &mut HookEvent) -> Result<()> {
        if event.event_type != EventType::ModelAfter || event.error.is_some() {
            return Ok(());
        }

        let prompt = event.int(keys::PROMPT_TOKENS).unwrap_or(0).max(0) as u64;
        let completion = event.int(keys::COMPLETION_TOKENS).unwrap_or(0).max(0) as u64;

        let dollars = event
            .metadata
            .get(keys::MODEL)
            .and_then(|v| v.as_str())
            .and_then(|model| self.prices.get(model))
            .map(|price| {
                prompt as f64 / 1000.0 * price.prompt_per_1k
                    + completion as f64 / 1000.0 * price.completion_per_1k
            })
            .unwrap_or(0.0);

        let mut inner = self.inner.lock();
        inner.global.prompt_tokens += prompt;
        inner.global.completion_tokens += completion;
        inner.global.dollars += dollars;

        if let Some(session_id) = event
            .metadata
            .get(keys::SESSION_ID)
            .and_then(|v| v.as_str())
        {
            let session = inner.per_session.entry(session_id.to_string()).or_default();
            session.prompt_tokens += prompt;
            session.completion_tokens += completion;
            session.dollars += dollars;
        }

        debug!(
            tokens = prompt + completion,
            dollars, "model call accounted"
        );
        Ok(())
    }
}
