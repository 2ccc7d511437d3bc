//! Shared test doubles

use async_trait::async_trait;
use drover_core::{ChatModel, ChatRequest, ChatResponse, CoreError, Result, Role, ToolCall};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tooling::CancelToken;

enum Scripted {
    Response(ChatResponse),
    Error(String),
}

/// Scripted chat model: pops queued responses in order, with an optional
/// default reply and a fixed reply for summarization requests.
pub struct MockProvider {
    responses: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
    default_reply: Option<String>,
    summarizer_reply: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            default_reply: None,
            summarizer_reply: None,
        }
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    /// Answer summarization prompts with this text instead of the queue.
    pub fn with_summarizer_reply(mut self, reply: impl Into<String>) -> Self {
        self.summarizer_reply = Some(reply.into());
        self
    }

    pub fn push_text(&self, content: &str) {
        self.responses
            .lock()
            .push_back(Scripted::Response(ChatResponse::text(content)));
    }

    pub fn push_response(&self, response: ChatResponse) {
        self.responses.lock().push_back(Scripted::Response(response));
    }

    pub fn push_tool_call(&self, id: &str, name: &str, arguments: &str) {
        self.responses
            .lock()
            .push_back(Scripted::Response(ChatResponse::tool_calls(vec![
                ToolCall::new(id, name, arguments),
            ])));
    }

    pub fn push_error(&self, message: &str) {
        self.responses
            .lock()
            .push_back(Scripted::Error(message.to_string()));
    }

    /// Number of chat calls made, including summarization calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().clone()
    }
}

#[async_trait]
impl ChatModel for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, _cancel: &CancelToken, request: ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let is_summarization = request
            .messages
            .first()
            .map(|m| m.role == Role::System && m.content.contains("You summarize conversations"))
            .unwrap_or(false);
        if is_summarization {
            if let Some(reply) = &self.summarizer_reply {
                return Ok(ChatResponse::text(reply.clone()));
            }
        }

        *self.last_request.lock() = Some(request);

        match self.responses.lock().pop_front() {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::Error(message)) => Err(CoreError::provider("mock", message)),
            None => match &self.default_reply {
                Some(reply) => Ok(ChatResponse::text(reply.clone())),
                None => Err(CoreError::provider("mock", "no scripted response left")),
            },
        }
    }
}
