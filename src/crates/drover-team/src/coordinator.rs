//! Coordinator decomposition strategy
//!
//! A designated coordinator agent (explicit, else the first added) is
//! prompted for a JSON plan of tasks. Independent tasks are delegated over
//! the bus in parallel; dependent tasks wait for their dependency's output,
//! which is merged into their input. Task outputs fold into the running
//! state. Planning repeats until the coordinator reports `done`, produces no
//! tasks, or the iteration cap is hit.

use crate::error::{Result, TeamError};
use crate::team::Team;
use drover_bus::TaskPayload;
use drover_core::json::parse_salvaged;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tooling::CancelToken;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct PlanTask {
    agent_id: String,
    description: String,
    #[serde(default)]
    depends_on: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Plan {
    #[serde(default)]
    tasks: Vec<PlanTask>,
    #[serde(default)]
    done: bool,
}

impl Team {
    pub(crate) async fn run_coordinator(
        &self,
        cancel: &CancelToken,
        mut state: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let coordinator_id = match &self.coordinator {
            Some(id) => id.clone(),
            None => self
                .agents
                .first()
                .map(|a| a.id().to_string())
                .ok_or(TeamError::NoAgents)?,
        };
        let coordinator = self
            .member(&coordinator_id)
            .ok_or_else(|| TeamError::UnknownAgent(coordinator_id.clone()))?
            .clone();

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return Err(TeamError::Cancelled);
            }

            let prompt = self.plan_prompt(&coordinator_id, &state)?;
            let response = coordinator.chat(cancel, &prompt).await?;
            let plan: Plan = parse_salvaged(&response.content)
                .map_err(|e| TeamError::PlanParse(e.to_string()))?;

            for task in &plan.tasks {
                if self.member(&task.agent_id).is_none() {
                    return Err(TeamError::UnknownAgent(task.agent_id.clone()));
                }
            }

            debug!(
                team = %self.name,
                iteration,
                tasks = plan.tasks.len(),
                done = plan.done,
                "coordinator plan"
            );

            if plan.tasks.is_empty() {
                break;
            }

            let (independent, dependent): (Vec<&PlanTask>, Vec<&PlanTask>) =
                plan.tasks.iter().partition(|task| task.depends_on.is_none());

            // Outputs per agent, available to dependents within this round.
            let mut outputs: HashMap<String, Map<String, Value>> = HashMap::new();

            let delegator = coordinator_id.as_str();
            let delegations = independent.iter().map(|task| {
                let payload =
                    TaskPayload::new(task.description.clone()).with_input(state.clone());
                async move {
                    let result = self
                        .bus
                        .delegate_task(cancel, delegator, &task.agent_id, &task.description, payload)
                        .await;
                    (task.agent_id.clone(), result)
                }
            });
            for (agent_id, result) in futures::future::join_all(delegations).await {
                let payload = result?;
                if !payload.success {
                    return Err(TeamError::TaskFailed {
                        agent: agent_id,
                        message: payload.error.unwrap_or_else(|| "task failed".to_string()),
                    });
                }
                for (key, value) in &payload.output {
                    state.insert(key.clone(), value.clone());
                }
                outputs.insert(agent_id, payload.output);
            }

            for task in dependent {
                let mut input = state.clone();
                if let Some(dependency) = &task.depends_on {
                    if let Some(output) = outputs.get(dependency) {
                        for (key, value) in output {
                            input.insert(key.clone(), value.clone());
                        }
                    }
                }

                let payload = self
                    .bus
                    .delegate_task(
                        cancel,
                        &coordinator_id,
                        &task.agent_id,
                        &task.description,
                        TaskPayload::new(task.description.clone()).with_input(input),
                    )
                    .await?;
                if !payload.success {
                    return Err(TeamError::TaskFailed {
                        agent: task.agent_id.clone(),
                        message: payload.error.unwrap_or_else(|| "task failed".to_string()),
                    });
                }
                for (key, value) in &payload.output {
                    state.insert(key.clone(), value.clone());
                }
                outputs.insert(task.agent_id.clone(), payload.output);
            }

            if plan.done {
                break;
            }
        }

        Ok(state)
    }

    fn plan_prompt(&self, coordinator_id: &str, state: &Map<String, Value>) -> Result<String> {
        let members: Vec<Value> = self
            .agents
            .iter()
            .filter(|a| a.id() != coordinator_id)
            .map(|a| serde_json::to_value(a.descriptor()))
            .collect::<std::result::Result<_, _>>()
            .map_err(drover_core::CoreError::from)?;

        Ok(format!(
            "You coordinate a team of agents. Decompose the remaining work into tasks \
             for your team members.\n\nTeam members:\n{}\n\nCurrent state:\n{}\n\n\
             Respond with JSON: {{\"tasks\": [{{\"agent_id\": \"<id>\", \"description\": \
             \"<what to do>\", \"depends_on\": \"<agent_id or omit>\"}}], \"done\": \
             <true when no further planning is needed>}}",
            serde_json::to_string_pretty(&members).map_err(drover_core::CoreError::from)?,
            Value::Object(state.clone())
        ))
    }
}
