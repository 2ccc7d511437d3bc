//! Persistence ports for the drover runtime
//!
//! This crate defines the two storage abstractions the core consumes - a
//! relational-style [`Store`] (sessions, events, checkpoints, memory, audit,
//! traces) and a [`VectorStore`] (embedding collections with similarity
//! search) - together with in-memory reference implementations.
//!
//! The core relies on three guarantees from any backend:
//!
//! - appending a single event or checkpoint is atomic;
//! - reads within a session observe prior writes;
//! - `list_events(session, after_seq)` returns records with strictly
//!   increasing `seq_num >= after_seq + 1`.
//!
//! Concrete database backends (SQLite, Postgres, Redis, ...) live in
//! downstream crates and implement these traits; [`MemoryStore`] and
//! [`MemoryVectorStore`] are the reference implementations used in tests and
//! development.

pub mod error;
pub mod memory;
pub mod records;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryStore, MemoryVectorStore};
pub use records::{
    AuditEntry, CheckpointRecord, Embedding, EventRecord, MemoryKind, MemoryRecord, SearchHit,
    Session, SessionStatus, TraceRecord,
};
pub use traits::{Store, VectorStore};
