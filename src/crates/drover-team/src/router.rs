//! Router dispatch strategy
//!
//! Chooses exactly one agent for the state, in priority order: a model-based
//! router (an LLM choosing between agent descriptors), a pure static routing
//! function, then a capability-match heuristic scoring agents by how many of
//! their declared capabilities appear as keys or string values in the state
//! (ties broken by insertion order).

use crate::error::{Result, TeamError};
use crate::team::Team;
use drover_core::json::parse_salvaged;
use drover_core::{ChatRequest, Message};
use serde::Deserialize;
use serde_json::{Map, Value};
use tooling::CancelToken;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RouteChoice {
    agent_id: String,
}

impl Team {
    pub(crate) async fn run_router(
        &self,
        cancel: &CancelToken,
        state: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let target = self.route(cancel, &state).await?;
        let agent = self
            .member(&target)
            .ok_or_else(|| TeamError::UnknownAgent(target.clone()))?;

        debug!(team = %self.name, agent = %target, "routed");
        Ok(agent.execute(cancel, state).await?)
    }

    async fn route(&self, cancel: &CancelToken, state: &Map<String, Value>) -> Result<String> {
        if let Some(provider) = &self.router_provider {
            match self.model_route(cancel, provider.as_ref(), state).await {
                Ok(choice) if self.member(&choice).is_some() => return Ok(choice),
                Ok(choice) => {
                    debug!(choice = %choice, "model router chose a non-member, falling back")
                }
                Err(e) => debug!(error = %e, "model router failed, falling back"),
            }
        }

        if let Some(router) = &self.static_router {
            return Ok(router(state));
        }

        self.capability_route(state)
    }

    async fn model_route(
        &self,
        cancel: &CancelToken,
        provider: &dyn drover_core::ChatModel,
        state: &Map<String, Value>,
    ) -> Result<String> {
        let descriptors: Vec<Value> = self
            .agents
            .iter()
            .map(|a| serde_json::to_value(a.descriptor()))
            .collect::<std::result::Result<_, _>>()
            .map_err(drover_core::CoreError::from)?;

        let prompt = format!(
            "Choose the best agent for the request.\n\nAgents:\n{}\n\nState:\n{}\n\n\
             Respond with JSON: {{\"agent_id\": \"<id>\"}}",
            serde_json::to_string_pretty(&descriptors).map_err(drover_core::CoreError::from)?,
            Value::Object(state.clone())
        );

        let request = ChatRequest::new(vec![Message::user(prompt)])
            .with_temperature(0.0)
            .with_json_output();
        let response = provider.chat(cancel, request).await?;

        let choice: RouteChoice =
            parse_salvaged(&response.content).map_err(|e| TeamError::PlanParse(e.to_string()))?;
        Ok(choice.agent_id)
    }

    /// Score each agent by capability hits in the state; ties go to
    /// insertion order.
    fn capability_route(&self, state: &Map<String, Value>) -> Result<String> {
        let mut best: Option<(usize, &str)> = None;

        for agent in &self.agents {
            let score = agent
                .capabilities()
                .iter()
                .filter(|capability| {
                    state.contains_key(capability.as_str())
                        || state
                            .values()
                            .any(|value| value.as_str() == Some(capability.as_str()))
                })
                .count();

            match best {
                Some((top, _)) if score <= top => {}
                _ => best = Some((score, agent.id())),
            }
        }

        best.map(|(_, id)| id.to_string())
            .ok_or(TeamError::NoAgents)
    }
}
