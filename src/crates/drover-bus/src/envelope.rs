//! Envelopes and typed payloads
//!
//! An [`Envelope`] is the bus message unit: routing fields, a type
//! discriminator, and an opaque JSON body. Envelopes are immutable once
//! `send` returns; broadcast delivery clones a copy per recipient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Recipient sentinel addressing every registered peer except the sender.
pub const BROADCAST: &str = "*";

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    TaskRequest,
    TaskResult,
    Question,
    Answer,
    Broadcast,
    Error,
    Event,
}

/// The bus message unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per bus lifetime; assigned by the bus at send time when empty.
    #[serde(default)]
    pub id: String,

    pub envelope_type: EnvelopeType,

    /// Sending peer id.
    pub from: String,

    /// Recipient peer id, or [`BROADCAST`].
    pub to: String,

    /// Id of the envelope this one replies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    #[serde(default)]
    pub subject: String,

    /// Opaque payload.
    #[serde(default)]
    pub body: Value,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(
        envelope_type: EnvelopeType,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            envelope_type,
            from: from.into(),
            to: to.into(),
            reply_to: None,
            subject: String::new(),
            body: Value::Null,
            priority: 0,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether this envelope's expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at < Utc::now()).unwrap_or(false)
    }
}

/// Body of a `task_request` envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPayload {
    pub description: String,

    /// Input state handed to the executing agent.
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl TaskPayload {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            input: Map::new(),
        }
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }
}

/// Body of a `task_result` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultPayload {
    pub success: bool,

    #[serde(default)]
    pub output: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultPayload {
    pub fn ok(output: Map<String, Value>) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Map::new(),
            error: Some(error.into()),
        }
    }
}

/// Body of a `question` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question: String,
}

/// Body of an `answer` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub answer: Value,
}
