//! Bus error types

use thiserror::Error;

/// Convenience result type using [`BusError`].
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors surfaced by bus operations.
///
/// Handler failures never surface from `send` - the bus synthesizes an
/// error-typed reply instead, so the requester observes them as data.
#[derive(Error, Debug)]
pub enum BusError {
    /// A peer with this id is already registered.
    #[error("peer '{0}' is already registered")]
    PeerExists(String),

    /// The envelope's recipient is not a registered peer.
    #[error("recipient '{0}' is not registered")]
    RecipientNotFound(String),

    /// The recipient's inbox is full; the send fails immediately
    /// (back-pressure, never blocking).
    #[error("inbox of peer '{0}' is full")]
    InboxFull(String),

    /// The bus has been closed.
    #[error("bus is closed")]
    Closed,

    /// A wait for a correlated reply ended (cancellation) before one arrived.
    #[error("no reply before cancellation for envelope '{0}'")]
    NoReply(String),

    /// No direct channel exists between the two peers.
    #[error("no direct channel between '{a}' and '{b}'")]
    NoDirectChannel { a: String, b: String },

    /// A payload could not be (de)serialized.
    #[error("envelope payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}
