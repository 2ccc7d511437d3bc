//! Storage port traits consumed by the core
//!
//! Backends implement [`Store`] and [`VectorStore`] to plug any storage
//! system into the runtime. Implementations must be `Send + Sync`; each
//! method is a suspension point and should honour the caller's cancellation
//! by returning promptly once the underlying I/O does.

use crate::error::Result;
use crate::records::{
    AuditEntry, CheckpointRecord, Embedding, EventRecord, MemoryKind, MemoryRecord, SearchHit,
    Session, SessionStatus, TraceRecord,
};
use async_trait::async_trait;
use serde_json::Value;

/// Relational-style storage port.
///
/// Covers session CRUD, the append-only event ledger, checkpoints, agent
/// memory, the audit log, and traces.
///
/// # Ledger semantics
///
/// `append_event` assigns the next per-session `seq_num` atomically and
/// returns the stored record. Sequence numbers start at 1 and are strictly
/// increasing within a session; replay is a `list_events` in ascending
/// `seq_num` order.
#[async_trait]
pub trait Store: Send + Sync {
    // Sessions

    /// Insert a new session row.
    async fn create_session(&self, session: Session) -> Result<()>;

    /// Fetch a session by id.
    async fn get_session(&self, id: &str) -> Result<Session>;

    /// Update a session's status (and touch `updated_at`).
    async fn update_session_status(&self, id: &str, status: SessionStatus) -> Result<()>;

    /// List sessions belonging to an agent.
    async fn list_sessions(&self, agent_id: &str) -> Result<Vec<Session>>;

    // Event ledger

    /// Append an event, assigning the next per-session seq_num.
    ///
    /// Returns the stored record including the assigned `seq_num` and id.
    async fn append_event(
        &self,
        session_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<EventRecord>;

    /// List events with `seq_num > after_seq`, ascending.
    async fn list_events(&self, session_id: &str, after_seq: i64) -> Result<Vec<EventRecord>>;

    // Checkpoints

    /// Persist a checkpoint atomically.
    ///
    /// Checkpoints are keyed by `(run_id, seq_num)`: saving the same boundary
    /// again replaces the earlier snapshot, so a run has exactly one
    /// checkpoint per ledger position.
    async fn save_checkpoint(&self, checkpoint: CheckpointRecord) -> Result<()>;

    /// Fetch a checkpoint by id.
    async fn get_checkpoint(&self, id: &str) -> Result<CheckpointRecord>;

    /// The most recent checkpoint for a session, if any.
    async fn latest_checkpoint(&self, session_id: &str) -> Result<Option<CheckpointRecord>>;

    /// All checkpoints for a session, ordered by creation and seq_num.
    async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointRecord>>;

    // Memory

    /// Upsert a memory record keyed by `(agent_id, kind, key)`.
    async fn put_memory(&self, record: MemoryRecord) -> Result<()>;

    /// Fetch a memory record.
    async fn get_memory(
        &self,
        agent_id: &str,
        kind: MemoryKind,
        key: &str,
    ) -> Result<Option<MemoryRecord>>;

    /// List all memory records of a kind for an agent.
    async fn list_memories(&self, agent_id: &str, kind: MemoryKind) -> Result<Vec<MemoryRecord>>;

    /// Delete a memory record; no-op when absent.
    async fn delete_memory(&self, agent_id: &str, kind: MemoryKind, key: &str) -> Result<()>;

    // Audit log

    /// Append an audit entry.
    async fn append_audit(&self, entry: AuditEntry) -> Result<()>;

    /// List audit entries, oldest first.
    async fn list_audit(&self) -> Result<Vec<AuditEntry>>;

    // Traces

    /// Insert a trace record.
    async fn insert_trace(&self, trace: TraceRecord) -> Result<()>;

    /// Fetch a trace by id.
    async fn get_trace(&self, id: &str) -> Result<TraceRecord>;

    /// List traces for a session, oldest first.
    async fn list_traces(&self, session_id: &str) -> Result<Vec<TraceRecord>>;

    // Lifecycle

    /// Run backend migrations. No-op for backends without schemas.
    async fn migrate(&self) -> Result<()>;

    /// Close the store. Subsequent operations fail with
    /// [`StoreError::Closed`](crate::StoreError::Closed).
    async fn close(&self) -> Result<()>;
}

/// Embedding storage port with similarity search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection with a fixed embedding dimension.
    ///
    /// Creating an existing collection is an error only when the dimension
    /// differs.
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;

    /// Insert or replace embeddings by id.
    async fn upsert(&self, collection: &str, embeddings: Vec<Embedding>) -> Result<()>;

    /// Return the `top_k` nearest embeddings by cosine similarity.
    ///
    /// Scores are mapped into `[0, 1]` with higher meaning more similar.
    async fn search(&self, collection: &str, query: &[f32], top_k: usize)
        -> Result<Vec<SearchHit>>;

    /// Delete embeddings by id; missing ids are ignored.
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// Close the store.
    async fn close(&self) -> Result<()>;
}
