//! Provider traits
//!
//! Implementations convert between these types and their provider's wire
//! format, handle authentication, and map transport failures into
//! [`CoreError::Provider`](crate::CoreError::Provider). They must be
//! `Send + Sync`; share them across agents as `Arc<dyn ChatModel>`.

use crate::error::Result;
use crate::llm::request::{ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, PartialResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tooling::CancelToken;

/// Chat-capable language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Stable provider name; used as the cache and rate-limit key.
    fn name(&self) -> &str;

    /// Generate a complete response.
    async fn chat(&self, cancel: &CancelToken, request: ChatRequest) -> Result<ChatResponse>;

    /// Stream a response chunk by chunk.
    ///
    /// The default implementation performs a blocking [`chat`](Self::chat)
    /// and yields the result as a single final chunk; providers with native
    /// streaming should override it.
    async fn stream_chat(
        &self,
        cancel: &CancelToken,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<PartialResponse>> {
        let response = self.chat(cancel, request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(PartialResponse {
                delta: response.content,
                done: true,
                usage: Some(response.usage),
                stop_reason: Some(response.stop_reason),
            })
            .await;
        Ok(rx)
    }
}

/// Embedding model port.
#[async_trait]
pub trait EmbeddingsProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, cancel: &CancelToken, request: EmbedRequest) -> Result<EmbedResponse>;
}

/// A retrieved knowledge snippet.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: HashMap<String, Value>,
    /// Relevance score in `[0, 1]`, higher is better.
    pub score: f32,
}

/// Knowledge-source port for retrieval-augmented prompting.
#[async_trait]
pub trait Knowledge: Send + Sync {
    /// Load or refresh the underlying source.
    async fn load(&self, cancel: &CancelToken) -> Result<()>;

    /// Return the `top_k` most relevant documents for a query.
    async fn search(
        &self,
        cancel: &CancelToken,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Document>>;

    /// Release resources.
    async fn close(&self) -> Result<()>;
}
