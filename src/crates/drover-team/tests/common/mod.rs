//! Shared test doubles

use async_trait::async_trait;
use drover_core::{ChatModel, ChatRequest, ChatResponse, CoreError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tooling::CancelToken;

/// Scripted chat model for team tests: queued responses first, then an
/// optional default reply.
pub struct MockProvider {
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
    default_reply: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            default_reply: None,
        }
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    pub fn push_text(&self, content: &str) {
        self.responses
            .lock()
            .push_back(Ok(ChatResponse::text(content)));
    }

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
        *self.last_request.lock() = Some(request);

        match self.responses.lock().pop_front() {
            Some(response) => response,
            None => match &self.default_reply {
                Some(reply) => Ok(ChatResponse::text(reply.clone())),
                None => Err(CoreError::provider("mock", "no scripted response left")),
            },
        }
    }
}
