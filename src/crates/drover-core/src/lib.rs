//! # drover-core
//!
//! Core runtime of the drover orchestration framework: durable execution of
//! computation graphs, an interception chain wrapping every model and tool
//! call, context-window management with rolling summaries, and the agent
//! loop that ties them together.
//!
//! The crate is organised leaves-first:
//!
//! - [`llm`] - provider-agnostic ports ([`ChatModel`], [`EmbeddingsProvider`],
//!   [`Knowledge`]) and the message/request types they exchange
//! - [`interceptor`] - the before/after chain and the standard cache, retry,
//!   metrics, rate-limit, cost, and logging interceptors
//! - [`context`] - token estimation and rolling-summary compression
//! - [`tool`] / [`guardrail`] - the tool registry with permission
//!   enforcement, and input/output guardrails
//! - [`graph`] / [`builder`] / [`runner`] / [`stream`] - the state graph,
//!   its builder, the durable runner, and its observer stream
//! - [`memory`] - long-term memory injection and best-effort extraction
//! - [`agent`] - single-turn, session-turn, and graph-mode execution
//!
//! Storage is abstract: everything durable goes through the
//! [`drover_store::Store`] port.

pub mod agent;
pub mod builder;
pub mod context;
pub mod error;
pub mod graph;
pub mod guardrail;
pub mod interceptor;
pub mod json;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod runner;
pub mod stream;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentDescriptor, EVENT_CHAT_MESSAGE, EVENT_CHAT_SUMMARY};
pub use builder::GraphBuilder;
pub use context::{ContextConfig, ContextManager};
pub use error::{CoreError, Result};
pub use graph::{CompiledGraph, Node, NodeContext, NodeId, END, START};
pub use guardrail::{GuardrailEngine, Position, Rule};
pub use interceptor::{
    CacheInterceptor, CostInterceptor, EventType, HookEvent, Interceptor, InterceptorChain,
    LoggingInterceptor, MetricsInterceptor, ModelPrice, RateLimitInterceptor, RateLimitMode,
    RetryInterceptor,
};
pub use knowledge::VectorKnowledge;
pub use llm::{
    ChatModel, ChatRequest, ChatResponse, Document, EmbeddingsProvider, Knowledge, Message,
    PartialResponse, Role, StopReason, ToolCall, ToolSpec, Usage,
};
pub use memory::MemoryManager;
pub use runner::{GraphRunner, RunState, RunStatus, EVENT_NODE_EXECUTED};
pub use stream::{RunEvent, RunEventKind};
pub use tool::{Permission, ToolContext, ToolDefinition, ToolRegistry};
