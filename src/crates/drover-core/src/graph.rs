//! Graph data structures
//!
//! Nodes are async handlers over a JSON state mapping; edges are static
//! targets or pure routing functions of the state. Two sentinel ids are
//! reserved: [`START`] marks where execution begins and [`END`] marks
//! successful completion. A [`CompiledGraph`] is the validated, immutable
//! form produced by [`GraphBuilder`](crate::builder::GraphBuilder).

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tooling::CancelToken;

/// Node identifier, unique within a graph.
pub type NodeId = String;

/// Sentinel id for the graph entry point.
pub const START: &str = "__start__";

/// Sentinel id for graph termination.
pub const END: &str = "__end__";

/// Error type node handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Async node handler: `(ctx, state) -> new state`.
pub type NodeHandler = Arc<
    dyn Fn(NodeContext, Value) -> BoxFuture<'static, std::result::Result<Value, HandlerError>>
        + Send
        + Sync,
>;

/// Pure routing function of state, for conditional edges.
pub type EdgeRouter = Arc<dyn Fn(&Value) -> NodeId + Send + Sync>;

/// Execution context handed to node handlers.
#[derive(Clone)]
pub struct NodeContext {
    pub run_id: String,
    pub session_id: String,
    pub cancel: CancelToken,
}

/// A processing unit in the graph.
#[derive(Clone)]
pub struct Node {
    pub id: NodeId,
    pub handler: NodeHandler,

    /// Interrupt nodes pause the run before executing, for
    /// human-in-the-loop workflows.
    pub interrupt: bool,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("interrupt", &self.interrupt)
            .field("handler", &"<function>")
            .finish()
    }
}

/// Where an edge leads: a fixed node or a router over state.
#[derive(Clone)]
pub enum EdgeTarget {
    Static(NodeId),
    Conditional(EdgeRouter),
}

impl std::fmt::Debug for EdgeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeTarget::Static(to) => f.debug_tuple("Static").field(to).finish(),
            EdgeTarget::Conditional(_) => f.debug_tuple("Conditional").field(&"<function>").finish(),
        }
    }
}

/// A transition between nodes.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: NodeId,
    pub target: EdgeTarget,
}

/// The validated, immutable form of a graph.
///
/// Adjacency keeps edges in registration order. Routing from a node prefers
/// the first conditional edge; with none present, the first static edge is
/// taken.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    id: String,
    nodes: HashMap<NodeId, Node>,
    adjacency: HashMap<NodeId, Vec<Edge>>,
    entry: NodeId,
}

impl CompiledGraph {
    pub(crate) fn new(
        id: String,
        nodes: HashMap<NodeId, Node>,
        adjacency: HashMap<NodeId, Vec<Edge>>,
        entry: NodeId,
    ) -> Self {
        Self {
            id,
            nodes,
            adjacency,
            entry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Outgoing edges of a node, in registration order.
    pub fn edges_from(&self, id: &str) -> &[Edge] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve the next node from `from` given the current state.
    ///
    /// Returns `None` when there is no outgoing edge; a returned [`END`]
    /// means the graph completed.
    pub fn next_node(&self, from: &str, state: &Value) -> Option<NodeId> {
        let edges = self.adjacency.get(from)?;

        if let Some(edge) = edges
            .iter()
            .find(|e| matches!(e.target, EdgeTarget::Conditional(_)))
        {
            if let EdgeTarget::Conditional(router) = &edge.target {
                return Some(router(state));
            }
        }

        edges.iter().find_map(|e| match &e.target {
            EdgeTarget::Static(to) => Some(to.clone()),
            EdgeTarget::Conditional(_) => None,
        })
    }
}
