//! Sequential pipeline strategy
//!
//! Threads one state mapping through the agents in insertion order. Before
//! each step, shared-context keys absent from the state are merged in; after
//! each step the result is folded back into both the state and the shared
//! context, and a `step:N:completed` broadcast is fired from the finishing
//! agent.

use crate::error::{Result, TeamError};
use crate::team::Team;
use drover_bus::{Envelope, EnvelopeType, BROADCAST};
use serde_json::{Map, Value};
use tooling::CancelToken;
use tracing::debug;

impl Team {
    pub(crate) async fn run_sequential(
        &self,
        cancel: &CancelToken,
        mut state: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        for (index, agent) in self.agents.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(TeamError::Cancelled);
            }

            // Shared context fills gaps but never overrides the state.
            {
                let shared = self.shared.lock();
                for (key, value) in shared.iter() {
                    if !state.contains_key(key) {
                        state.insert(key.clone(), value.clone());
                    }
                }
            }

            if index > 0 {
                if let Some(previous) = state.get("response").cloned() {
                    state.insert("_previous_response".to_string(), previous);
                }
            }

            debug!(team = %self.name, step = index, agent = agent.id(), "sequential step");
            let result = agent.execute(cancel, state).await?;

            {
                let mut shared = self.shared.lock();
                for (key, value) in &result {
                    shared.insert(key.clone(), value.clone());
                }
            }
            state = result;

            // Step-completion broadcast from the finishing agent; a full
            // peer inbox must not fail the pipeline.
            if let Err(e) = self.bus.send(
                Envelope::new(EnvelopeType::Broadcast, agent.id(), BROADCAST)
                    .with_subject(format!("step:{}:completed", index)),
            ) {
                debug!(error = %e, "step broadcast dropped");
            }
        }

        Ok(state)
    }
}
