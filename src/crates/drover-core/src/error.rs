//! Error types for the core runtime
//!
//! One enum covers the taxonomy the runtime surfaces: configuration and
//! validation failures, guardrail and tool-permission rejections, resource
//! exhaustion (rate limits, budgets), dependency failures (provider, storage,
//! embeddings, knowledge), state lookups, and cancellation. Every variant's
//! display names the component and operation that failed.
//!
//! Recovery policy (who does *not* see these errors): tool handler failures
//! are captured into the transcript so the model can self-correct; memory
//! extraction failures are swallowed; stream-channel send failures are
//! dropped; after-interceptor errors following a successful operation are
//! logged only.

use drover_store::StoreError;
use thiserror::Error;

/// Convenience result type using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the core runtime.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Graph or builder validation failed (unknown targets, missing entry).
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// A component was configured inconsistently (missing provider, missing
    /// storage for session operations, unknown strategy).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An input guardrail rejected the user message.
    #[error("guardrail violation [input] {name}: {reason}")]
    GuardrailInput { name: String, reason: String },

    /// An output guardrail rejected the final response.
    #[error("guardrail violation [output] {name}: {reason}")]
    GuardrailOutput { name: String, reason: String },

    /// The named tool is not registered.
    #[error("tool '{0}' not found in registry")]
    ToolNotFound(String),

    /// The tool's permission is `deny`; the handler was never invoked.
    #[error("tool '{0}' is denied by policy")]
    ToolDenied(String),

    /// The approval gate rejected the call (cause preserved).
    #[error("approval denied for tool '{tool}': {reason}")]
    ApprovalDenied { tool: String, reason: String },

    /// The tool requires approval but no approval handler is configured.
    #[error("tool '{0}' requires approval but no approval handler is configured")]
    MissingApprovalHandler(String),

    /// A rate-limit bucket had no capacity (fail-fast mode).
    #[error("rate limit exceeded for provider '{0}'")]
    RateLimitExceeded(String),

    /// Cumulative model spend reached the configured budget.
    #[error("cost budget exceeded: spent ${spent:.4} of ${budget:.4}")]
    BudgetExceeded { spent: f64, budget: f64 },

    /// A model provider call failed.
    #[error("provider call failed ({context}): {message}")]
    Provider { context: String, message: String },

    /// An embeddings call failed.
    #[error("embedding call failed: {0}")]
    Embed(String),

    /// A knowledge-source search failed.
    #[error("knowledge search failed: {0}")]
    Knowledge(String),

    /// A storage call failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The runner's current node is absent from the compiled graph.
    #[error("node '{0}' not found in graph")]
    NodeNotFound(String),

    /// A node handler returned an error.
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// No checkpoint exists to resume from.
    #[error("no checkpoint found for {0}")]
    CheckpointNotFound(String),

    /// The session row does not exist.
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// State or payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Create a provider error with component/operation context.
    pub fn provider(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a node execution error.
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create an approval-denied error preserving the cause.
    pub fn approval_denied(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ApprovalDenied {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}
