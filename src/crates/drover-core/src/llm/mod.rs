//! Model-provider ports
//!
//! drover is an orchestration runtime, not an LLM client library. This module
//! defines the provider-agnostic types and traits the runtime consumes -
//! [`ChatModel`], [`EmbeddingsProvider`], [`Knowledge`] - and leaves the wire
//! formats (OpenAI, Anthropic, Gemini, local servers, ...) to downstream
//! crates implementing the traits.

pub mod message;
pub mod request;
pub mod traits;

pub use message::{Message, Role, ToolCall};
pub use request::{
    ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, PartialResponse, ResponseFormat,
    StopReason, ToolSpec, Usage,
};
pub use traits::{ChatModel, Document, EmbeddingsProvider, Knowledge};
