//! Bounded-parallel fan-out strategy
//!
//! One detached task per agent, each on a shallow copy of the input state,
//! with concurrency bounded by a semaphore. The error policy decides whether
//! the first failure cancels siblings (fail-fast), failures are aggregated
//! (collect), or survivors win (best-effort). Successful states are merged
//! with the caller's merge function or [`crate::merge::default_merge`].

use crate::error::{Result, TeamError};
use crate::merge::default_merge;
use crate::team::{ErrorStrategy, Team};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tooling::CancelToken;
use tracing::debug;

impl Team {
    pub(crate) async fn run_parallel(
        &self,
        cancel: &CancelToken,
        state: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let permits = if self.max_concurrency == 0 {
            Semaphore::MAX_PERMITS
        } else {
            self.max_concurrency
        };
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut tokens = Vec::with_capacity(self.agents.len());
        let mut handles = Vec::with_capacity(self.agents.len());

        for agent in &self.agents {
            let agent = agent.clone();
            let child = cancel.child();
            tokens.push(child.clone());
            let semaphore = semaphore.clone();
            let snapshot = state.clone();

            handles.push((
                agent.id().to_string(),
                tokio::spawn(async move {
                    let _permit = tokio::select! {
                        _ = child.cancelled() => return Err(TeamError::Cancelled),
                        permit = semaphore.acquire_owned() => {
                            permit.map_err(|_| TeamError::Cancelled)?
                        }
                    };
                    if child.is_cancelled() {
                        return Err(TeamError::Cancelled);
                    }
                    agent
                        .execute(&child, snapshot)
                        .await
                        .map_err(TeamError::from)
                }),
            ));
        }

        let mut successes = Vec::new();
        let mut failures = Vec::new();

        for (agent_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(TeamError::Configuration(format!(
                    "agent task for '{}' aborted: {}",
                    agent_id, join_err
                ))),
            };

            match outcome {
                Ok(result) => successes.push((agent_id, result)),
                Err(e) => match self.error_strategy {
                    ErrorStrategy::FailFast => {
                        for token in &tokens {
                            token.cancel();
                        }
                        return Err(e);
                    }
                    ErrorStrategy::Collect | ErrorStrategy::BestEffort => {
                        debug!(agent = %agent_id, error = %e, "parallel agent failed");
                        failures.push((agent_id, e.to_string()));
                    }
                },
            }
        }

        if self.error_strategy == ErrorStrategy::Collect && !failures.is_empty() {
            return Err(TeamError::Aggregate(failures));
        }

        let merged = match &self.merge {
            Some(merge) => merge(state, successes),
            None => default_merge(state, successes),
        };
        Ok(merged)
    }
}
