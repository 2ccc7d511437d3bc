//! Agent core
//!
//! An [`Agent`] composes a model provider with tools, guardrails, an
//! interceptor chain, and optional knowledge, memory, storage, and a compiled
//! graph. It offers three execution surfaces:
//!
//! - [`chat`](Agent::chat) - single-turn: assemble the prompt, run the
//!   model/tool loop, enforce guardrails;
//! - [`chat_with_session`](Agent::chat_with_session) - durable turns: replay
//!   the session ledger, manage the context window with rolling summaries,
//!   persist every message as an event;
//! - [`run`](Agent::run) - graph mode: execute the attached compiled graph
//!   under a session.
//!
//! Every model call flows through the interceptor chain: the cache may
//! short-circuit the provider, the cost hook may abort on budget, the rate
//! limiter may wait, and the retry hook records backoff that this loop
//! re-issues. Tool handler errors are captured into the transcript rather
//! than surfaced, so the model has a chance to self-correct.

use crate::context::{ContextConfig, ContextManager};
use crate::error::{CoreError, Result};
use crate::graph::CompiledGraph;
use crate::guardrail::{GuardrailEngine, Position, Rule};
use crate::interceptor::{keys, EventType, HookEvent, InterceptorChain};
use crate::llm::{ChatModel, ChatRequest, ChatResponse, Knowledge, Message, StopReason};
use crate::memory::MemoryManager;
use crate::runner::{GraphRunner, RunState};
use crate::tool::{ToolContext, ToolDefinition, ToolRegistry};
use drover_store::{AuditEntry, Session, SessionStatus, Store};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tooling::timeout::TimeoutError;
use tooling::{with_timeout, CancelToken};
use tracing::{debug, warn};

/// Ledger event type for persisted chat messages.
pub const EVENT_CHAT_MESSAGE: &str = "chat_message";

/// Ledger event type for rolling-summary snapshots.
pub const EVENT_CHAT_SUMMARY: &str = "chat_summary";

/// Shape shown to routers choosing between agents.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    id: String,
    provider: Arc<dyn ChatModel>,
    model: Option<String>,
    description: String,
    system_prompt: Option<String>,
    instructions: Vec<String>,
    tools: Arc<ToolRegistry>,
    guardrails: GuardrailEngine,
    chain: Arc<InterceptorChain>,
    knowledge: Option<Arc<dyn Knowledge>>,
    memory: Option<Arc<MemoryManager>>,
    store: Option<Arc<dyn Store>>,
    graph: Option<Arc<CompiledGraph>>,
    output_schema: Option<Value>,
    context: ContextConfig,
    sub_agents: Vec<String>,
    capabilities: Vec<String>,
    max_tool_rounds: usize,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    request_timeout: Option<Duration>,
}

impl AgentBuilder {
    pub fn new(id: impl Into<String>, provider: Arc<dyn ChatModel>) -> Self {
        Self {
            id: id.into(),
            provider,
            model: None,
            description: String::new(),
            system_prompt: None,
            instructions: Vec::new(),
            tools: Arc::new(ToolRegistry::new()),
            guardrails: GuardrailEngine::new(),
            chain: Arc::new(InterceptorChain::new()),
            knowledge: None,
            memory: None,
            store: None,
            graph: None,
            output_schema: None,
            context: ContextConfig::default(),
            sub_agents: Vec::new(),
            capabilities: Vec::new(),
            max_tool_rounds: 8,
            temperature: None,
            max_tokens: None,
            request_timeout: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    /// Register a tool on the agent's registry.
    pub fn tool(self, definition: ToolDefinition) -> Result<Self> {
        self.tools.register(definition)?;
        Ok(self)
    }

    /// Replace the tool registry wholesale (to share one across agents).
    pub fn tool_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tools = registry;
        self
    }

    pub fn guardrail(mut self, rule: Rule) -> Self {
        self.guardrails.add_rule(rule);
        self
    }

    pub fn interceptors(mut self, chain: InterceptorChain) -> Self {
        self.chain = Arc::new(chain);
        self
    }

    pub fn knowledge(mut self, knowledge: Arc<dyn Knowledge>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn graph(mut self, graph: Arc<CompiledGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Request structured JSON output conforming to this schema fragment.
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn sub_agent(mut self, id: impl Into<String>) -> Self {
        self.sub_agents.push(id.into());
        self
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Agent {
        Agent {
            id: self.id,
            provider: self.provider,
            model: self.model,
            description: self.description,
            system_prompt: self.system_prompt,
            instructions: self.instructions,
            tools: self.tools,
            guardrails: self.guardrails,
            chain: self.chain,
            knowledge: self.knowledge,
            memory: self.memory,
            store: self.store,
            graph: self.graph,
            output_schema: self.output_schema,
            context: ContextManager::new(self.context),
            sub_agents: self.sub_agents,
            capabilities: self.capabilities,
            max_tool_rounds: self.max_tool_rounds,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            request_timeout: self.request_timeout,
        }
    }
}

/// A named configuration composing a model provider, tools, guardrails,
/// memory, knowledge, and an optional graph.
pub struct Agent {
    id: String,
    provider: Arc<dyn ChatModel>,
    model: Option<String>,
    description: String,
    system_prompt: Option<String>,
    instructions: Vec<String>,
    tools: Arc<ToolRegistry>,
    guardrails: GuardrailEngine,
    chain: Arc<InterceptorChain>,
    knowledge: Option<Arc<dyn Knowledge>>,
    memory: Option<Arc<MemoryManager>>,
    store: Option<Arc<dyn Store>>,
    graph: Option<Arc<CompiledGraph>>,
    output_schema: Option<Value>,
    context: ContextManager,
    sub_agents: Vec<String>,
    capabilities: Vec<String>,
    max_tool_rounds: usize,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    request_timeout: Option<Duration>,
}

impl Agent {
    pub fn builder(id: impl Into<String>, provider: Arc<dyn ChatModel>) -> AgentBuilder {
        AgentBuilder::new(id, provider)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn sub_agents(&self) -> &[String] {
        &self.sub_agents
    }

    pub fn interceptors(&self) -> &InterceptorChain {
        &self.chain
    }

    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            id: self.id.clone(),
            description: self.description.clone(),
            capabilities: self.capabilities.clone(),
        }
    }

    /// Single-turn chat.
    pub async fn chat(&self, cancel: &CancelToken, user_message: &str) -> Result<ChatResponse> {
        self.guardrails.check(Position::Input, user_message)?;

        let mut messages = self.assemble_system(cancel, user_message).await?;
        messages.push(Message::user(user_message));

        let (response, transcript) = self.complete(cancel, messages, None).await?;
        self.guardrails.check(Position::Output, &response.content)?;

        self.extract_memories(cancel, None, user_message, &response.content, &transcript)
            .await;

        Ok(response)
    }

    /// Durable session turn.
    ///
    /// Replays the session ledger into in-memory history, persists the user
    /// message, compresses the context when it overflows, runs the model/tool
    /// loop, and persists the assistant message. On failure the user message
    /// stays in the ledger and the assistant message does not, so a retry is
    /// safe.
    pub async fn chat_with_session(
        &self,
        cancel: &CancelToken,
        session_id: &str,
        user_message: &str,
    ) -> Result<ChatResponse> {
        let store = self.require_store()?;

        self.guardrails.check(Position::Input, user_message)?;

        // Ensure the session row exists.
        match store.get_session(session_id).await {
            Ok(_) => {}
            Err(drover_store::StoreError::SessionNotFound(_)) => {
                store
                    .create_session(Session::new(session_id, &self.id))
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        // Rebuild history and rolling summary from the ledger.
        let (mut history, mut summary) = self.replay_session(store.as_ref(), session_id).await?;

        let user = Message::user(user_message);
        store
            .append_event(session_id, EVENT_CHAT_MESSAGE, serde_json::to_value(&user)?)
            .await?;
        history.push(user);

        // Context management: compress when over the window, persisting the
        // new rolling summary to the same ledger.
        let system = self.assemble_system(cancel, user_message).await?;
        if self
            .context
            .should_compress(self.model.as_deref(), &system, &history)
        {
            let compression = self
                .context
                .compress(
                    cancel,
                    &self.provider,
                    &self.chain,
                    self.model.as_deref(),
                    history,
                    summary.as_deref(),
                )
                .await?;
            if !compression.summary.is_empty() {
                store
                    .append_event(
                        session_id,
                        EVENT_CHAT_SUMMARY,
                        json!({
                            "summary": compression.summary.clone(),
                            "preserved": compression.preserved.len(),
                        }),
                    )
                    .await?;
                summary = Some(compression.summary);
            }
            history = compression.preserved;
        }

        let mut messages = system;
        if let Some(summary) = &summary {
            messages.push(Message::system(format!(
                "Summary of the conversation so far:\n{}",
                summary
            )));
        }
        messages.extend(history.iter().cloned());

        let (response, transcript) = self.complete(cancel, messages, Some(session_id)).await?;
        self.guardrails.check(Position::Output, &response.content)?;

        let assistant = Message::assistant(&response.content);
        store
            .append_event(
                session_id,
                EVENT_CHAT_MESSAGE,
                serde_json::to_value(&assistant)?,
            )
            .await?;

        self.extract_memories(
            cancel,
            Some(session_id),
            user_message,
            &response.content,
            &transcript,
        )
        .await;

        Ok(response)
    }

    /// Graph mode: execute the attached compiled graph under a new session.
    pub async fn run(&self, cancel: &CancelToken, input: Value) -> Result<RunState> {
        let graph = self
            .graph
            .clone()
            .ok_or_else(|| CoreError::Configuration(format!("agent '{}' has no graph", self.id)))?;
        let store = self.require_store()?;

        let session = Session::new(uuid::Uuid::new_v4().to_string(), &self.id);
        let session_id = session.id.clone();
        store.create_session(session).await?;
        store
            .update_session_status(&session_id, SessionStatus::Running)
            .await?;

        let mut before = HookEvent::new(EventType::NodeBefore, graph.id()).with_input(input.clone());
        self.chain.before(cancel, &mut before).await?;

        let runner = GraphRunner::new(graph.clone(), store.clone());
        let result = runner.run(cancel, &session_id, input.clone()).await;

        let mut after = HookEvent::new(EventType::NodeAfter, graph.id());
        match &result {
            Ok(run) => after.output = Some(run.state.clone()),
            Err(e) => after.error = Some(e.to_string()),
        }
        self.chain.after(&mut after).await;

        match result {
            Ok(run) => {
                let status = match run.status {
                    crate::runner::RunStatus::Paused => SessionStatus::Paused,
                    _ => SessionStatus::Completed,
                };
                store.update_session_status(&session_id, status).await?;

                let user = input
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let assistant = run
                    .state
                    .get("response")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                self.extract_memories(cancel, Some(&session_id), &user, &assistant, &[])
                    .await;

                Ok(run)
            }
            Err(e) => {
                store
                    .update_session_status(&session_id, SessionStatus::Failed)
                    .await?;
                Err(e)
            }
        }
    }

    /// Execute with a state mapping; the entry point teams use.
    ///
    /// Graph agents run their graph on the state. Chat agents take
    /// `state.message` (or a textualization of the state) as the prompt and
    /// merge `{response}` into the state.
    pub async fn execute(
        &self,
        cancel: &CancelToken,
        state: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        if self.graph.is_some() {
            let run = self.run(cancel, Value::Object(state.clone())).await?;
            return Ok(match run.state {
                Value::Object(result) => {
                    let mut merged = state;
                    for (key, value) in result {
                        merged.insert(key, value);
                    }
                    merged
                }
                other => {
                    let mut merged = state;
                    merged.insert("response".to_string(), other);
                    merged
                }
            });
        }

        let prompt = match state.get("message").and_then(|v| v.as_str()) {
            Some(message) => message.to_string(),
            None => textualize(&state),
        };

        let response = self.chat(cancel, &prompt).await?;
        let mut merged = state;
        merged.insert("response".to_string(), json!(response.content));
        Ok(merged)
    }

    fn require_store(&self) -> Result<Arc<dyn Store>> {
        self.store.clone().ok_or_else(|| {
            CoreError::Configuration(format!("agent '{}' has no storage attached", self.id))
        })
    }

    /// Replay `chat_message` / `chat_summary` events into (history, summary).
    async fn replay_session(
        &self,
        store: &dyn Store,
        session_id: &str,
    ) -> Result<(Vec<Message>, Option<String>)> {
        let events = store.list_events(session_id, 0).await?;

        let mut history = Vec::new();
        let mut summary = None;
        for event in events {
            match event.event_type.as_str() {
                EVENT_CHAT_MESSAGE => {
                    let message: Message = serde_json::from_value(event.payload)?;
                    history.push(message);
                }
                EVENT_CHAT_SUMMARY => {
                    summary = event
                        .payload
                        .get("summary")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    // The summary replaced everything except the preserved
                    // tail; drop the compressed prefix from the rebuild too.
                    let preserved = event
                        .payload
                        .get("preserved")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0) as usize;
                    let keep = preserved.min(history.len());
                    history = history.split_off(history.len() - keep);
                }
                _ => {}
            }
        }
        Ok((history, summary))
    }

    /// System prompt, instructions, injected memories, retrieved knowledge.
    async fn assemble_system(
        &self,
        cancel: &CancelToken,
        user_message: &str,
    ) -> Result<Vec<Message>> {
        let mut messages = Vec::new();

        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        for instruction in &self.instructions {
            messages.push(Message::system(instruction.clone()));
        }

        if let Some(memory) = &self.memory {
            let records = memory.inject(&self.id).await?;
            if !records.is_empty() {
                let mut text = String::from("Known facts from memory:\n");
                for record in records {
                    text.push_str(&format!("- {}: {}\n", record.key, record.value));
                }
                messages.push(Message::system(text));
            }
        }

        if let Some(knowledge) = &self.knowledge {
            let documents = knowledge
                .search(cancel, user_message, 5)
                .await
                .map_err(|e| CoreError::Knowledge(e.to_string()))?;
            if !documents.is_empty() {
                let mut text = String::from("Relevant knowledge:\n");
                for document in documents {
                    text.push_str(&format!("- {}\n", document.content));
                }
                messages.push(Message::system(text));
            }
        }

        Ok(messages)
    }

    /// The model/tool loop shared by single-turn and session chat.
    ///
    /// Returns the final response plus the transcript accumulated along the
    /// way (assistant tool-call messages and tool results).
    async fn complete(
        &self,
        cancel: &CancelToken,
        mut messages: Vec<Message>,
        session_id: Option<&str>,
    ) -> Result<(ChatResponse, Vec<Message>)> {
        let tool_specs = self.tools.specs();
        let mut transcript = Vec::new();
        let mut rounds = 0;

        loop {
            let mut request = ChatRequest::new(messages.clone()).with_tools(tool_specs.clone());
            if let Some(model) = &self.model {
                request = request.with_model(model.clone());
            }
            if let Some(temperature) = self.temperature {
                request = request.with_temperature(temperature);
            }
            if let Some(max_tokens) = self.max_tokens {
                request = request.with_max_tokens(max_tokens);
            }
            if self.output_schema.is_some() {
                request = request.with_json_output();
            }

            let response = self.invoke_model(cancel, &request, session_id).await?;

            if response.stop_reason == StopReason::ToolCall
                && !response.tool_calls.is_empty()
                && rounds < self.max_tool_rounds
            {
                rounds += 1;

                let assistant = Message::assistant_with_tool_calls(
                    &response.content,
                    response.tool_calls.clone(),
                );
                messages.push(assistant.clone());
                transcript.push(assistant);

                for call in &response.tool_calls {
                    let tool_message = self.execute_tool_call(cancel, session_id, call).await?;
                    messages.push(tool_message.clone());
                    transcript.push(tool_message);
                }
                continue;
            }

            return Ok((response, transcript));
        }
    }

    /// One tool call: decode, fire hooks, execute, capture the result (or the
    /// error) as a tool-role message.
    async fn execute_tool_call(
        &self,
        cancel: &CancelToken,
        session_id: Option<&str>,
        call: &crate::llm::ToolCall,
    ) -> Result<Message> {
        let decoded: std::result::Result<Value, _> = serde_json::from_str(&call.arguments);

        let input = match &decoded {
            Ok(args) => args.clone(),
            Err(_) => Value::String(call.arguments.clone()),
        };
        let mut before = HookEvent::new(EventType::ToolBefore, &call.name).with_input(input.clone());
        if let Some(session_id) = session_id {
            before
                .metadata
                .insert(keys::SESSION_ID.to_string(), json!(session_id));
        }
        self.chain.before(cancel, &mut before).await?;

        let result = match decoded {
            Ok(args) => {
                let mut ctx = ToolContext::new(&self.id, cancel.clone());
                if let Some(session_id) = session_id {
                    ctx = ctx.with_session(session_id);
                }
                self.tools.execute(ctx, &call.name, args).await
            }
            Err(e) => Err(CoreError::Serialization(e)),
        };

        let mut after = HookEvent::new(EventType::ToolAfter, &call.name).with_input(input);
        let content = match &result {
            Ok(value) => {
                after.output = Some(value.clone());
                serde_json::to_string(value)?
            }
            Err(e) => {
                // Captured into the transcript so the model can recover.
                after.error = Some(e.to_string());
                debug!(tool = %call.name, error = %e, "tool call failed");
                format!("Error: {}", e)
            }
        };
        self.chain.after(&mut after).await;

        // Best-effort audit trail of tool executions.
        if let Some(store) = &self.store {
            let entry = AuditEntry::new(
                self.id.clone(),
                "tool.execute",
                json!({
                    "tool": call.name.clone(),
                    "session_id": session_id,
                    "ok": result.is_ok(),
                }),
            );
            if let Err(e) = store.append_audit(entry).await {
                debug!(error = %e, "audit append failed");
            }
        }

        Ok(Message::tool(content, &call.id, &call.name))
    }

    /// One logical model call: interceptors, cache short-circuit, retry loop.
    async fn invoke_model(
        &self,
        cancel: &CancelToken,
        request: &ChatRequest,
        session_id: Option<&str>,
    ) -> Result<ChatResponse> {
        let mut attempts: i64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let input = serde_json::to_value(request)?;
            let estimated = self.context.estimate(request.messages.iter());

            let mut before =
                HookEvent::new(EventType::ModelBefore, self.provider.name()).with_input(input.clone());
            self.stamp(&mut before, session_id);
            before
                .metadata
                .insert(keys::ESTIMATED_TOKENS.to_string(), json!(estimated));
            self.chain.before(cancel, &mut before).await?;

            let cache_hit = before.flag(keys::CACHE_HIT);
            let (output, error) = if cache_hit {
                let cached = before
                    .metadata
                    .get(keys::CACHED_OUTPUT)
                    .cloned()
                    .ok_or_else(|| {
                        CoreError::provider(&self.id, "cache hit flagged without cached output")
                    })?;
                let response: ChatResponse = serde_json::from_value(cached)?;
                (Some(response), None)
            } else {
                match self.call_provider(cancel, request.clone()).await {
                    Ok(response) => (Some(response), None),
                    Err(e) => (None, Some(e)),
                }
            };

            let mut after = HookEvent::new(EventType::ModelAfter, self.provider.name()).with_input(input);
            self.stamp(&mut after, session_id);
            if cache_hit {
                after
                    .metadata
                    .insert(keys::CACHE_HIT.to_string(), Value::Bool(true));
            }
            if attempts > 0 {
                after
                    .metadata
                    .insert(keys::RETRY_ATTEMPT.to_string(), json!(attempts));
            }
            if let Some(response) = &output {
                after.output = Some(serde_json::to_value(response)?);
                after
                    .metadata
                    .insert(keys::PROMPT_TOKENS.to_string(), json!(response.usage.prompt_tokens));
                after.metadata.insert(
                    keys::COMPLETION_TOKENS.to_string(),
                    json!(response.usage.completion_tokens),
                );
            }
            if let Some(e) = &error {
                after.error = Some(e.to_string());
            }
            self.chain.after(&mut after).await;

            match (output, error) {
                (Some(response), _) => return Ok(response),
                (None, Some(e)) => {
                    if after.flag(keys::RETRY) {
                        attempts = after.int(keys::RETRY_ATTEMPT).unwrap_or(attempts + 1);
                        let delay = after.int(keys::RETRY_DELAY_MS).unwrap_or(0).max(0) as u64;
                        warn!(
                            agent = %self.id,
                            attempt = attempts,
                            delay_ms = delay,
                            error = %e,
                            "retrying model call"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        }
                        continue;
                    }
                    return Err(CoreError::provider(
                        format!("agent '{}'", self.id),
                        e.to_string(),
                    ));
                }
                (None, None) => {
                    return Err(CoreError::provider(
                        format!("agent '{}'", self.id),
                        "provider returned neither response nor error",
                    ));
                }
            }
        }
    }

    async fn call_provider(
        &self,
        cancel: &CancelToken,
        request: ChatRequest,
    ) -> Result<ChatResponse> {
        match self.request_timeout {
            Some(timeout) => {
                match with_timeout(timeout, self.provider.chat(cancel, request)).await {
                    Ok(response) => Ok(response),
                    Err(TimeoutError::OperationFailed(e)) => Err(e),
                    Err(TimeoutError::Timeout(duration)) => Err(CoreError::provider(
                        format!("agent '{}'", self.id),
                        format!("provider call timed out after {:?}", duration),
                    )),
                }
            }
            None => self.provider.chat(cancel, request).await,
        }
    }

    fn stamp(&self, event: &mut HookEvent, session_id: Option<&str>) {
        if let Some(model) = &self.model {
            event.metadata.insert(keys::MODEL.to_string(), json!(model));
        }
        if let Some(session_id) = session_id {
            event
                .metadata
                .insert(keys::SESSION_ID.to_string(), json!(session_id));
        }
    }

    /// Best-effort memory extraction from the turn's transcript.
    async fn extract_memories(
        &self,
        cancel: &CancelToken,
        session_id: Option<&str>,
        user_message: &str,
        assistant_message: &str,
        tool_transcript: &[Message],
    ) {
        let Some(memory) = &self.memory else {
            return;
        };

        let mut transcript = Vec::with_capacity(tool_transcript.len() + 2);
        if !user_message.is_empty() {
            transcript.push(Message::user(user_message));
        }
        transcript.extend(tool_transcript.iter().cloned());
        if !assistant_message.is_empty() {
            transcript.push(Message::assistant(assistant_message));
        }

        memory.extract(cancel, &self.id, session_id, &transcript).await;
    }
}

/// Deterministic key-sorted rendering of a state mapping, used as the prompt
/// when no `message` key is present.
fn textualize(state: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = state.keys().collect();
    keys.sort();

    let mut text = String::new();
    for key in keys {
        text.push_str(&format!("{}: {}\n", key, state[key.as_str()]));
    }
    text
}
