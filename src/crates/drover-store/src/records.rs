//! Persisted record types
//!
//! Every record is JSON-serializable; dynamic payloads are carried as
//! `serde_json::Value` so persistence stays round-trippable regardless of
//! backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle status of a session.
///
/// Transitions are monotonic except for the `Running` <-> `Paused` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Active,
}

/// A durable identity binding multiple turns and runs of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id.
    pub id: String,

    /// Owning agent id.
    pub agent_id: String,

    /// Current lifecycle status.
    pub status: SessionStatus,

    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new active session for an agent.
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            status: SessionStatus::Active,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// An append-only ledger entry.
///
/// `(session_id, seq_num)` is strictly increasing and unique; the store
/// assigns `seq_num` at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub session_id: String,
    pub seq_num: i64,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// A persisted snapshot of run state after a node, sufficient to resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: String,
    pub session_id: String,
    pub run_id: String,
    /// Graph id of the run this checkpoint belongs to.
    pub graph_id: String,
    /// Node the runner was at when the checkpoint was written.
    pub node_id: String,
    /// Full state mapping at the boundary.
    pub state: Value,
    /// Matches the event ledger position at the boundary.
    pub seq_num: i64,
    pub created_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Create a checkpoint with a fresh id.
    pub fn new(
        session_id: impl Into<String>,
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        node_id: impl Into<String>,
        state: Value,
        seq_num: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            node_id: node_id.into(),
            state,
            seq_num,
            created_at: Utc::now(),
        }
    }
}

/// Discriminator for memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    ShortTerm,
    LongTerm,
}

/// A durable fact remembered for an agent, addressable by
/// `(agent_id, kind, key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub kind: MemoryKind,
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(
        agent_id: impl Into<String>,
        kind: MemoryKind,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            session_id: None,
            kind,
            key: key.into(),
            value,
            created_at: Utc::now(),
        }
    }

    /// Attach the session this memory was extracted from.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor: String,
    pub action: String,
    pub detail: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, detail: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor: actor.into(),
            action: action.into(),
            detail,
            created_at: Utc::now(),
        }
    }
}

/// A trace record tied to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl TraceRecord {
    pub fn new(session_id: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            name: name.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// An embedding stored in a vector collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Embedding {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata: HashMap::new(),
        }
    }
}

/// A similarity-search result.
///
/// `score` is cosine similarity mapped into `[0, 1]`, higher is better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}
