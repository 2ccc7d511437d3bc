//! Team definition and builder
//!
//! A team owns its strategy, an insertion-ordered agent list, a pointer to
//! the shared bus, and a shared-context mapping that strategies read from
//! and accumulate into. Agents are registered on the bus at build time with
//! the default peer handler from [`crate::handler`].

use crate::error::{Result, TeamError};
use crate::handler::default_peer_handler;
use drover_bus::{Bus, PeerSpec};
use drover_core::{Agent, ChatModel};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tooling::CancelToken;

/// Coordination strategy governing team execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Thread one state through the agents in insertion order.
    Sequential,
    /// Fan out to all agents on snapshots of the input, then merge.
    Parallel,
    /// Choose a single agent and execute it.
    Router,
    /// Let a coordinator agent plan and delegate tasks over the bus.
    Coordinator,
}

/// Error policy for parallel fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStrategy {
    /// Cancel siblings on the first error and return it.
    FailFast,
    /// Run everything; aggregate any failures into one error.
    Collect,
    /// Ignore failed agents and merge the survivors.
    BestEffort,
}

/// Merge function combining per-agent result states into one.
pub type MergeFn =
    Arc<dyn Fn(Map<String, Value>, Vec<(String, Map<String, Value>)>) -> Map<String, Value> + Send + Sync>;

/// Pure router from state to an agent id.
pub type StaticRouter = Arc<dyn Fn(&Map<String, Value>) -> String + Send + Sync>;

/// A named group of agents coordinated by one strategy.
pub struct Team {
    pub(crate) name: String,
    pub(crate) strategy: Strategy,
    pub(crate) agents: Vec<Arc<Agent>>,
    pub(crate) bus: Arc<Bus>,
    pub(crate) shared: Arc<Mutex<Map<String, Value>>>,
    pub(crate) max_concurrency: usize,
    pub(crate) error_strategy: ErrorStrategy,
    pub(crate) merge: Option<MergeFn>,
    pub(crate) static_router: Option<StaticRouter>,
    pub(crate) router_provider: Option<Arc<dyn ChatModel>>,
    pub(crate) coordinator: Option<String>,
    pub(crate) max_iterations: usize,
}

impl Team {
    pub fn builder(name: impl Into<String>) -> TeamBuilder {
        TeamBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id().to_string()).collect()
    }

    pub(crate) fn member(&self, id: &str) -> Option<&Arc<Agent>> {
        self.agents.iter().find(|a| a.id() == id)
    }

    /// Snapshot of the shared context.
    pub fn shared_context(&self) -> Map<String, Value> {
        self.shared.lock().clone()
    }

    /// Register an agent on the bus with the default peer handler and add it
    /// to the team.
    pub fn add_agent(&mut self, agent: Arc<Agent>) -> Result<()> {
        let spec = PeerSpec::new(agent.id())
            .with_description(agent.descriptor().description)
            .with_handler(default_peer_handler(agent.clone(), self.shared.clone()));
        let spec = agent
            .capabilities()
            .iter()
            .fold(spec, |spec, capability| spec.with_capability(capability.clone()));

        self.bus.register(spec)?;
        self.agents.push(agent);
        Ok(())
    }

    /// Execute the team on a state mapping under its strategy.
    pub async fn execute(
        &self,
        cancel: &CancelToken,
        state: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        if self.agents.is_empty() {
            return Err(TeamError::NoAgents);
        }

        match self.strategy {
            Strategy::Sequential => self.run_sequential(cancel, state).await,
            Strategy::Parallel => self.run_parallel(cancel, state).await,
            Strategy::Router => self.run_router(cancel, state).await,
            Strategy::Coordinator => self.run_coordinator(cancel, state).await,
        }
    }
}

/// Builder for [`Team`].
pub struct TeamBuilder {
    name: String,
    strategy: Strategy,
    bus: Option<Arc<Bus>>,
    agents: Vec<Arc<Agent>>,
    max_concurrency: usize,
    error_strategy: ErrorStrategy,
    merge: Option<MergeFn>,
    static_router: Option<StaticRouter>,
    router_provider: Option<Arc<dyn ChatModel>>,
    coordinator: Option<String>,
    max_iterations: usize,
}

impl TeamBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: Strategy::Sequential,
            bus: None,
            agents: Vec::new(),
            max_concurrency: 0,
            error_strategy: ErrorStrategy::FailFast,
            merge: None,
            static_router: None,
            router_provider: None,
            coordinator: None,
            max_iterations: 5,
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Share an existing bus; a private one is created otherwise.
    pub fn bus(mut self, bus: Arc<Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn agent(mut self, agent: Arc<Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Bound on concurrent agents in parallel fan-out; 0 means unbounded.
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn error_strategy(mut self, error_strategy: ErrorStrategy) -> Self {
        self.error_strategy = error_strategy;
        self
    }

    /// Custom merge for parallel results.
    pub fn merge<F>(mut self, merge: F) -> Self
    where
        F: Fn(Map<String, Value>, Vec<(String, Map<String, Value>)>) -> Map<String, Value>
            + Send
            + Sync
            + 'static,
    {
        self.merge = Some(Arc::new(merge));
        self
    }

    /// Pure routing function for the router strategy.
    pub fn static_router<F>(mut self, router: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> String + Send + Sync + 'static,
    {
        self.static_router = Some(Arc::new(router));
        self
    }

    /// Model used by the router strategy to pick an agent.
    pub fn model_router(mut self, provider: Arc<dyn ChatModel>) -> Self {
        self.router_provider = Some(provider);
        self
    }

    /// Designate the coordinator; defaults to the first agent added.
    pub fn coordinator(mut self, id: impl Into<String>) -> Self {
        self.coordinator = Some(id.into());
        self
    }

    /// Cap on coordinator planning rounds.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn build(self) -> Result<Team> {
        if let Some(coordinator) = &self.coordinator {
            if !self.agents.iter().any(|a| a.id() == coordinator.as_str()) {
                return Err(TeamError::UnknownAgent(coordinator.clone()));
            }
        }

        let mut team = Team {
            name: self.name,
            strategy: self.strategy,
            agents: Vec::new(),
            bus: self.bus.unwrap_or_else(Bus::with_defaults),
            shared: Arc::new(Mutex::new(Map::new())),
            max_concurrency: self.max_concurrency,
            error_strategy: self.error_strategy,
            merge: self.merge,
            static_router: self.static_router,
            router_provider: self.router_provider,
            coordinator: self.coordinator,
            max_iterations: self.max_iterations.max(1),
        };

        for agent in self.agents {
            team.add_agent(agent)?;
        }
        Ok(team)
    }
}
