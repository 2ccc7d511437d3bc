//! Fluent graph builder
//!
//! Accumulates nodes and edges, then validates and freezes them into a
//! [`CompiledGraph`]. Validation checks that an entry point exists and that
//! every static edge target names a node or the [`END`] sentinel; conditional
//! routers are opaque and checked at runtime instead.

use crate::error::{CoreError, Result};
use crate::graph::{
    CompiledGraph, Edge, EdgeTarget, HandlerError, Node, NodeContext, NodeId, END, START,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for [`CompiledGraph`].
///
/// # Example
///
/// ```rust
/// use drover_core::builder::GraphBuilder;
/// use serde_json::json;
///
/// let graph = GraphBuilder::new()
///     .add_node("greet", |_ctx, mut state| async move {
///         state["greeting"] = json!("hello");
///         Ok(state)
///     })
///     .set_entry_point("greet")
///     .set_finish_point("greet")
///     .compile()
///     .unwrap();
///
/// assert_eq!(graph.entry(), "greet");
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    id: Option<String>,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the graph id; a UUID is generated otherwise.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a node with an async handler.
    pub fn add_node<F, Fut>(self, id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(NodeContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<Value, HandlerError>>
            + Send
            + 'static,
    {
        self.insert_node(id.into(), handler, false)
    }

    /// Add a node that pauses the run before executing.
    pub fn add_interrupt_node<F, Fut>(self, id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(NodeContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<Value, HandlerError>>
            + Send
            + 'static,
    {
        self.insert_node(id.into(), handler, true)
    }

    fn insert_node<F, Fut>(mut self, id: String, handler: F, interrupt: bool) -> Self
    where
        F: Fn(NodeContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<Value, HandlerError>>
            + Send
            + 'static,
    {
        let node = Node {
            id: id.clone(),
            handler: Arc::new(move |ctx, state| {
                let fut: futures::future::BoxFuture<
                    'static,
                    std::result::Result<Value, HandlerError>,
                > = Box::pin(handler(ctx, state));
                fut
            }),
            interrupt,
        };
        self.nodes.insert(id, node);
        self
    }

    /// Add a static edge.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            target: EdgeTarget::Static(to.into()),
        });
        self
    }

    /// Add a conditional edge routed by a pure function of state.
    pub fn add_conditional_edge<F>(mut self, from: impl Into<String>, router: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.edges.push(Edge {
            from: from.into(),
            target: EdgeTarget::Conditional(Arc::new(router)),
        });
        self
    }

    /// Sugar for `add_edge(START, node)`.
    pub fn set_entry_point(self, node: impl Into<String>) -> Self {
        self.add_edge(START, node)
    }

    /// Sugar for `add_edge(node, END)`.
    pub fn set_finish_point(self, node: impl Into<String>) -> Self {
        self.add_edge(node, END)
    }

    /// Validate and freeze into a [`CompiledGraph`].
    pub fn compile(self) -> Result<CompiledGraph> {
        if self.nodes.contains_key(START) || self.nodes.contains_key(END) {
            return Err(CoreError::Validation(format!(
                "'{}' and '{}' are reserved node ids",
                START, END
            )));
        }

        // Entry: the first static edge out of START.
        let entry = self
            .edges
            .iter()
            .filter(|e| e.from == START)
            .find_map(|e| match &e.target {
                EdgeTarget::Static(to) => Some(to.clone()),
                EdgeTarget::Conditional(_) => None,
            })
            .ok_or_else(|| {
                CoreError::Validation("graph has no entry point (no static edge from __start__)".to_string())
            })?;

        if !self.nodes.contains_key(&entry) {
            return Err(CoreError::Validation(format!(
                "entry point '{}' does not exist",
                entry
            )));
        }

        for edge in &self.edges {
            if edge.from != START && !self.nodes.contains_key(&edge.from) {
                return Err(CoreError::Validation(format!(
                    "edge source '{}' does not exist",
                    edge.from
                )));
            }
            if let EdgeTarget::Static(to) = &edge.target {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(CoreError::Validation(format!(
                        "edge target '{}' does not exist",
                        to
                    )));
                }
            }
        }

        let mut adjacency: HashMap<NodeId, Vec<Edge>> = HashMap::new();
        for edge in self.edges {
            adjacency.entry(edge.from.clone()).or_default().push(edge);
        }

        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(CompiledGraph::new(id, self.nodes, adjacency, entry))
    }
}
