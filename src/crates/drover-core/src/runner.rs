//! Durable graph runner
//!
//! Advances a [`CompiledGraph`] node by node with durability guarantees:
//! after every node the new state is appended to the session's event ledger
//! and checkpointed, and persistence completes before the runner advances.
//! Interrupt nodes pause the run with a checkpoint sufficient to resume;
//! [`GraphRunner::resume_from_checkpoint`] replays from any earlier boundary
//! ("time travel") by branching onto a fresh run id.
//!
//! Execution is observable through a bounded, lossy event stream
//! ([`GraphRunner::subscribe`]); stream sends never block the run.

use crate::error::{CoreError, Result};
use crate::graph::{CompiledGraph, NodeContext, END};
use crate::stream::{ObserverSet, RunEvent, RunEventKind};
use chrono::{DateTime, Utc};
use drover_store::{CheckpointRecord, Store};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tooling::logging::timed;
use tooling::CancelToken;
use tracing::{debug, warn};

/// Ledger event type written after each executed node.
pub const EVENT_NODE_EXECUTED: &str = "node_executed";

/// Lifecycle of one graph execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

/// State of one execution of one graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub session_id: String,
    pub graph_id: String,
    pub current_node: String,
    pub status: RunStatus,
    pub state: Value,
    /// Ledger position of the latest persisted boundary.
    pub seq_num: i64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    fn new(session_id: &str, graph: &CompiledGraph, state: Value) -> Self {
        let now = Utc::now();
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            session_id: session_id.to_string(),
            graph_id: graph.id().to_string(),
            current_node: graph.entry().to_string(),
            status: RunStatus::Running,
            state,
            seq_num: 0,
            started_at: now,
            updated_at: now,
        }
    }

    fn from_checkpoint(checkpoint: &CheckpointRecord) -> Self {
        let now = Utc::now();
        Self {
            run_id: checkpoint.run_id.clone(),
            session_id: checkpoint.session_id.clone(),
            graph_id: checkpoint.graph_id.clone(),
            current_node: checkpoint.node_id.clone(),
            status: RunStatus::Running,
            state: checkpoint.state.clone(),
            seq_num: checkpoint.seq_num,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Executes compiled graphs against a store.
pub struct GraphRunner {
    graph: Arc<CompiledGraph>,
    store: Arc<dyn Store>,
    observers: ObserverSet,
}

impl GraphRunner {
    pub fn new(graph: Arc<CompiledGraph>, store: Arc<dyn Store>) -> Self {
        Self {
            graph,
            store,
            observers: ObserverSet::new(),
        }
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Observe run events through a bounded channel.
    ///
    /// Events arriving while the buffer is full are dropped.
    pub fn subscribe(&self, capacity: usize) -> ReceiverStream<RunEvent> {
        self.observers.subscribe(capacity)
    }

    /// Execute the graph from its entry point on a fresh run.
    ///
    /// Returns the final [`RunState`]: completed, or paused at an interrupt
    /// node with a checkpoint persisted.
    pub async fn run(
        &self,
        cancel: &CancelToken,
        session_id: &str,
        initial_state: Value,
    ) -> Result<RunState> {
        let run = RunState::new(session_id, &self.graph, initial_state);
        debug!(run_id = %run.run_id, session = session_id, "starting run");
        self.drive(cancel, run, false).await
    }

    /// Continue a paused run from the session's latest checkpoint.
    pub async fn resume(&self, cancel: &CancelToken, session_id: &str) -> Result<RunState> {
        let checkpoint = self
            .store
            .latest_checkpoint(session_id)
            .await?
            .ok_or_else(|| CoreError::CheckpointNotFound(format!("session '{}'", session_id)))?;

        let run = RunState::from_checkpoint(&checkpoint);
        debug!(run_id = %run.run_id, node = %run.current_node, "resuming run");
        self.drive(cancel, run, true).await
    }

    /// Continue from a specific earlier checkpoint ("time travel").
    ///
    /// Branches onto a fresh run id so the original run's boundaries stay
    /// intact; subsequent events and checkpoints continue the session ledger
    /// with strictly greater seq_nums.
    pub async fn resume_from_checkpoint(
        &self,
        cancel: &CancelToken,
        checkpoint_id: &str,
    ) -> Result<RunState> {
        let checkpoint = self.store.get_checkpoint(checkpoint_id).await?;

        let mut run = RunState::from_checkpoint(&checkpoint);
        run.run_id = format!("run_{}", uuid::Uuid::new_v4());
        debug!(run_id = %run.run_id, from = checkpoint_id, "branching run from checkpoint");
        self.drive(cancel, run, true).await
    }

    /// The main loop. `resume_interrupt` lets the first node execute even if
    /// it is the interrupt node we paused at.
    async fn drive(
        &self,
        cancel: &CancelToken,
        mut run: RunState,
        mut resume_interrupt: bool,
    ) -> Result<RunState> {
        while run.status == RunStatus::Running {
            // Cancellation is observed between nodes; the latest checkpoint
            // stays intact.
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let node = match self.graph.node(&run.current_node) {
                Some(node) => node.clone(),
                None => {
                    run.status = RunStatus::Failed;
                    run.updated_at = Utc::now();
                    let node_id = run.current_node.clone();
                    self.emit(
                        RunEventKind::Error,
                        &run,
                        Some(node_id.as_str()),
                        Some(json!({"error": "node not found"})),
                    );
                    return Err(CoreError::NodeNotFound(run.current_node.clone()));
                }
            };

            if node.interrupt && !std::mem::take(&mut resume_interrupt) {
                run.status = RunStatus::Paused;
                run.updated_at = Utc::now();
                self.emit(RunEventKind::Interrupt, &run, Some(node.id.as_str()), None);
                self.save_checkpoint(&run).await?;
                self.emit(
                    RunEventKind::Checkpoint,
                    &run,
                    Some(node.id.as_str()),
                    Some(json!({"seq_num": run.seq_num})),
                );
                return Ok(run);
            }

            self.emit(RunEventKind::NodeStart, &run, Some(node.id.as_str()), None);

            let ctx = NodeContext {
                run_id: run.run_id.clone(),
                session_id: run.session_id.clone(),
                cancel: cancel.clone(),
            };
            let result = timed(&node.id, (node.handler)(ctx, run.state.clone())).await;

            let new_state = match result {
                Ok(state) => state,
                Err(e) => {
                    run.status = RunStatus::Failed;
                    run.updated_at = Utc::now();
                    self.emit(
                        RunEventKind::Error,
                        &run,
                        Some(node.id.as_str()),
                        Some(json!({"error": e.to_string()})),
                    );
                    // Final checkpoint at the failing node; a persistence
                    // failure here must not mask the node error.
                    if let Err(persist_err) = self.save_checkpoint(&run).await {
                        warn!(
                            run_id = %run.run_id,
                            error = %persist_err,
                            "failed to persist checkpoint for failed run"
                        );
                    }
                    return Err(CoreError::node_execution(&node.id, e.to_string()));
                }
            };

            run.state = new_state;
            run.updated_at = Utc::now();
            self.emit(RunEventKind::NodeEnd, &run, Some(node.id.as_str()), None);

            // Persistence must complete before advancing: ledger event first
            // (the store assigns the boundary seq_num), then the checkpoint
            // at the same position.
            let event = self
                .store
                .append_event(
                    &run.session_id,
                    EVENT_NODE_EXECUTED,
                    json!({"node": node.id, "state": run.state}),
                )
                .await?;
            run.seq_num = event.seq_num;
            self.save_checkpoint(&run).await?;
            self.emit(
                RunEventKind::Checkpoint,
                &run,
                Some(node.id.as_str()),
                Some(json!({"seq_num": run.seq_num})),
            );

            match self.graph.next_node(&run.current_node, &run.state) {
                None => {
                    run.status = RunStatus::Completed;
                    run.updated_at = Utc::now();
                    self.emit(RunEventKind::Completed, &run, None, None);
                }
                Some(next) if next == END => {
                    run.status = RunStatus::Completed;
                    run.updated_at = Utc::now();
                    self.emit(RunEventKind::Completed, &run, None, None);
                }
                Some(next) => {
                    run.current_node = next.clone();
                    self.emit(RunEventKind::EdgeTransition, &run, Some(next.as_str()), None);
                }
            }
        }

        Ok(run)
    }

    async fn save_checkpoint(&self, run: &RunState) -> Result<()> {
        let checkpoint = CheckpointRecord::new(
            &run.session_id,
            &run.run_id,
            &run.graph_id,
            &run.current_node,
            run.state.clone(),
            run.seq_num,
        );
        self.store.save_checkpoint(checkpoint).await?;
        Ok(())
    }

    fn emit(&self, kind: RunEventKind, run: &RunState, node: Option<&str>, detail: Option<Value>) {
        let mut event = RunEvent::new(kind, &run.run_id);
        if let Some(node) = node {
            event = event.with_node(node);
        }
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.observers.emit(event);
    }
}
