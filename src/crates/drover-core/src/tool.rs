//! Tool registry with permission enforcement
//!
//! A thread-safe mapping from tool name to definition. Execution enforces the
//! tool's permission level before the handler ever runs: `deny` fails
//! outright, `require_approval` consults a registry-wide approval gate, and
//! `allow` invokes the handler with the decoded arguments.

use crate::error::{CoreError, Result};
use crate::llm::ToolSpec;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tooling::CancelToken;

/// Context passed to tool handlers.
#[derive(Clone)]
pub struct ToolContext {
    /// Agent executing the tool.
    pub agent_id: String,

    /// Session the call belongs to, when there is one.
    pub session_id: Option<String>,

    /// Cancellation signal for the handler's own I/O.
    pub cancel: CancelToken,

    /// Free-form call metadata.
    pub metadata: HashMap<String, Value>,
}

impl ToolContext {
    pub fn new(agent_id: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: None,
            cancel,
            metadata: HashMap::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// What a tool is allowed to do without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Allow,
    RequireApproval,
    Deny,
}

/// Async tool handler: receives the call context and decoded arguments.
pub type ToolHandler =
    Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Approval gate: receives the tool name and decoded arguments; `Ok(false)`
/// or `Err(reason)` both deny, preserving the cause.
pub type ApprovalHandler = Arc<
    dyn Fn(String, Value) -> BoxFuture<'static, std::result::Result<bool, String>> + Send + Sync,
>;

/// A named callable with schema and permission.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema fragment for the arguments.
    pub parameters: Value,
    pub permission: Permission,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    /// Create an allowed tool from an async closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            permission: Permission::Allow,
            handler: Arc::new(move |ctx, args| {
                let fut: BoxFuture<'static, Result<Value>> = Box::pin(handler(ctx, args));
                fut
            }),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    /// Shape attached to model requests.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("permission", &self.permission)
            .field("handler", &"<function>")
            .finish()
    }
}

/// Thread-safe tool registry.
///
/// Registration is write-exclusive; execution takes a read lock only long
/// enough to clone the definition out, so concurrent register/execute are
/// safe and handlers never run under the lock.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolDefinition>>>,
    approval: RwLock<Option<ApprovalHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique; re-registering is an error.
    pub fn register(&self, definition: ToolDefinition) -> Result<()> {
        let mut tools = self.tools.write();
        if tools.contains_key(&definition.name) {
            return Err(CoreError::Configuration(format!(
                "tool '{}' is already registered",
                definition.name
            )));
        }
        tools.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Install the approval gate consulted by `require_approval` tools.
    pub fn set_approval_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<bool, String>> + Send + 'static,
    {
        *self.approval.write() = Some(Arc::new(move |name, args| {
            let fut: BoxFuture<'static, std::result::Result<bool, String>> =
                Box::pin(handler(name, args));
            fut
        }));
    }

    /// Specs of all registered tools, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.read().values().map(|d| d.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Execute a tool by name with decoded arguments.
    ///
    /// - `deny`: fails with tool-denied, handler never invoked.
    /// - `require_approval`: consults the approval gate; a `false` or an
    ///   error denies with the cause preserved; no gate configured fails
    ///   with missing-approval-handler.
    /// - `allow`: invokes the handler; its result is returned unchanged.
    pub async fn execute(&self, ctx: ToolContext, name: &str, args: Value) -> Result<Value> {
        let definition = {
            let tools = self.tools.read();
            tools
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::ToolNotFound(name.to_string()))?
        };

        match definition.permission {
            Permission::Deny => return Err(CoreError::ToolDenied(name.to_string())),
            Permission::RequireApproval => {
                let approval = self.approval.read().clone();
                let Some(approve) = approval else {
                    return Err(CoreError::MissingApprovalHandler(name.to_string()));
                };
                match approve(name.to_string(), args.clone()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(CoreError::approval_denied(name, "approval rejected"));
                    }
                    Err(cause) => return Err(CoreError::approval_denied(name, cause)),
                }
            }
            Permission::Allow => {}
        }

        (definition.handler)(ctx, args).await
    }
}
