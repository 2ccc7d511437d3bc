//! In-memory reference backends
//!
//! [`MemoryStore`] and [`MemoryVectorStore`] implement the port traits over
//! `Arc<RwLock<...>>` interiors. They are the backends used by tests and
//! development; data does not survive a restart.
//!
//! Both are cheap to clone - clones share the same underlying state.

use crate::error::{Result, StoreError};
use crate::records::{
    AuditEntry, CheckpointRecord, Embedding, EventRecord, MemoryKind, MemoryRecord, SearchHit,
    Session, SessionStatus, TraceRecord,
};
use crate::traits::{Store, VectorStore};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, Session>,
    /// Events per session, in append order.
    events: HashMap<String, Vec<EventRecord>>,
    /// Next seq_num per session, shared by the event ledger.
    seqs: HashMap<String, i64>,
    /// Checkpoints by id, plus per-session insertion order and a
    /// (run_id, seq_num) index for boundary upserts.
    checkpoints: HashMap<String, CheckpointRecord>,
    checkpoint_order: HashMap<String, Vec<String>>,
    checkpoint_index: HashMap<(String, i64), String>,
    /// Memory records keyed by (agent_id, kind, key).
    memories: HashMap<(String, MemoryKind, String), MemoryRecord>,
    audit: Vec<AuditEntry>,
    traces: HashMap<String, TraceRecord>,
    trace_order: HashMap<String, Vec<String>>,
    closed: bool,
}

impl StoreInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

/// In-memory [`Store`] implementation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently held. Test helper.
    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Drop all state. Test helper for isolation between cases.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = StoreInner::default();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_session(&self, session: Session) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Session> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    async fn update_session_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        session.status = status;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn list_sessions(&self, agent_id: &str) -> Result<Vec<Session>> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.agent_id == agent_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn append_event(
        &self,
        session_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<EventRecord> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let seq = inner.seqs.entry(session_id.to_string()).or_insert(0);
        *seq += 1;

        let record = EventRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            seq_num: *seq,
            event_type: event_type.to_string(),
            payload,
            created_at: Utc::now(),
        };

        inner
            .events
            .entry(session_id.to_string())
            .or_default()
            .push(record.clone());

        Ok(record)
    }

    async fn list_events(&self, session_id: &str, after_seq: i64) -> Result<Vec<EventRecord>> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner
            .events
            .get(session_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.seq_num > after_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_checkpoint(&self, checkpoint: CheckpointRecord) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let boundary = (checkpoint.run_id.clone(), checkpoint.seq_num);
        if let Some(previous_id) = inner.checkpoint_index.get(&boundary).cloned() {
            // Same run boundary saved again: replace the earlier snapshot
            // in place so each (run_id, seq_num) has exactly one checkpoint.
            inner.checkpoints.remove(&previous_id);
            if let Some(order) = inner.checkpoint_order.get_mut(&checkpoint.session_id) {
                if let Some(slot) = order.iter_mut().find(|id| **id == previous_id) {
                    *slot = checkpoint.id.clone();
                }
            }
        } else {
            inner
                .checkpoint_order
                .entry(checkpoint.session_id.clone())
                .or_default()
                .push(checkpoint.id.clone());
        }

        inner.checkpoint_index.insert(boundary, checkpoint.id.clone());
        inner.checkpoints.insert(checkpoint.id.clone(), checkpoint);
        Ok(())
    }

    async fn get_checkpoint(&self, id: &str) -> Result<CheckpointRecord> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner
            .checkpoints
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::CheckpointNotFound(id.to_string()))
    }

    async fn latest_checkpoint(&self, session_id: &str) -> Result<Option<CheckpointRecord>> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner
            .checkpoint_order
            .get(session_id)
            .and_then(|order| order.last())
            .and_then(|id| inner.checkpoints.get(id))
            .cloned())
    }

    async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointRecord>> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        let mut checkpoints: Vec<CheckpointRecord> = inner
            .checkpoint_order
            .get(session_id)
            .map(|order| {
                order
                    .iter()
                    .filter_map(|id| inner.checkpoints.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        checkpoints.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.seq_num.cmp(&b.seq_num))
        });
        Ok(checkpoints)
    }

    async fn put_memory(&self, record: MemoryRecord) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        let key = (record.agent_id.clone(), record.kind, record.key.clone());
        inner.memories.insert(key, record);
        Ok(())
    }

    async fn get_memory(
        &self,
        agent_id: &str,
        kind: MemoryKind,
        key: &str,
    ) -> Result<Option<MemoryRecord>> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner
            .memories
            .get(&(agent_id.to_string(), kind, key.to_string()))
            .cloned())
    }

    async fn list_memories(&self, agent_id: &str, kind: MemoryKind) -> Result<Vec<MemoryRecord>> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        let mut records: Vec<MemoryRecord> = inner
            .memories
            .values()
            .filter(|m| m.agent_id == agent_id && m.kind == kind)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        Ok(records)
    }

    async fn delete_memory(&self, agent_id: &str, kind: MemoryKind, key: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner
            .memories
            .remove(&(agent_id.to_string(), kind, key.to_string()));
        Ok(())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner.audit.push(entry);
        Ok(())
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner.audit.clone())
    }

    async fn insert_trace(&self, trace: TraceRecord) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner
            .trace_order
            .entry(trace.session_id.clone())
            .or_default()
            .push(trace.id.clone());
        inner.traces.insert(trace.id.clone(), trace);
        Ok(())
    }

    async fn get_trace(&self, id: &str) -> Result<TraceRecord> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner
            .traces
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::backend("get_trace", format!("trace '{}' not found", id)))
    }

    async fn list_traces(&self, session_id: &str) -> Result<Vec<TraceRecord>> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner
            .trace_order
            .get(session_id)
            .map(|order| {
                order
                    .iter()
                    .filter_map(|id| inner.traces.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn migrate(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.write().closed = true;
        Ok(())
    }
}

struct Collection {
    dimension: usize,
    items: HashMap<String, Embedding>,
}

#[derive(Default)]
struct VectorInner {
    collections: HashMap<String, Collection>,
    closed: bool,
}

/// In-memory [`VectorStore`] implementation with brute-force cosine search.
#[derive(Clone, Default)]
pub struct MemoryVectorStore {
    inner: Arc<RwLock<VectorInner>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cosine similarity mapped into `[0, 1]`.
///
/// Zero-magnitude vectors score 0.
fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    (cosine + 1.0) / 2.0
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StoreError::Closed);
        }

        if let Some(existing) = inner.collections.get(name) {
            if existing.dimension != dimension {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: existing.dimension,
                    actual: dimension,
                });
            }
            return Ok(());
        }

        inner.collections.insert(
            name.to_string(),
            Collection {
                dimension,
                items: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn upsert(&self, collection: &str, embeddings: Vec<Embedding>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StoreError::Closed);
        }

        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        for embedding in embeddings {
            if embedding.vector.len() != coll.dimension {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: coll.dimension,
                    actual: embedding.vector.len(),
                });
            }
            coll.items.insert(embedding.id.clone(), embedding);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(StoreError::Closed);
        }

        let coll = inner
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        if query.len() != coll.dimension {
            return Err(StoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: coll.dimension,
                actual: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = coll
            .items
            .values()
            .map(|e| SearchHit {
                id: e.id.clone(),
                score: cosine_score(query, &e.vector),
                metadata: e.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StoreError::Closed);
        }

        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        for id in ids {
            coll.items.remove(id);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.write().closed = true;
        Ok(())
    }
}
