//! Run event stream
//!
//! The runner exposes a bounded, lossy observer channel: subscribers get a
//! receiver with a fixed capacity, and events that arrive while a receiver is
//! full are dropped (drop-newest) rather than blocking the execution hot
//! path. Closed receivers are pruned on the next emit.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    NodeStart,
    NodeEnd,
    EdgeTransition,
    Checkpoint,
    Interrupt,
    Error,
    Completed,
}

/// One observation from a running graph.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub kind: RunEventKind,
    pub run_id: String,

    /// Node the event refers to, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Kind-specific detail (error message, transition target, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,

    pub at: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(kind: RunEventKind, run_id: impl Into<String>) -> Self {
        Self {
            kind,
            run_id: run_id.into(),
            node: None,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Fan-out of run events to bounded subscribers.
#[derive(Default)]
pub(crate) struct ObserverSet {
    senders: Mutex<Vec<mpsc::Sender<RunEvent>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with the given buffer capacity.
    pub fn subscribe(&self, capacity: usize) -> ReceiverStream<RunEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.senders.lock().push(tx);
        ReceiverStream::new(rx)
    }

    /// Deliver an event to all subscribers.
    ///
    /// Full receivers drop this event; closed receivers are removed.
    pub fn emit(&self, event: RunEvent) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let observers = ObserverSet::new();
        let mut stream = observers.subscribe(8);

        observers.emit(RunEvent::new(RunEventKind::NodeStart, "run-1").with_node("a"));
        observers.emit(RunEvent::new(RunEventKind::Completed, "run-1"));

        let first = stream.next().await.unwrap();
        assert_eq!(first.kind, RunEventKind::NodeStart);
        assert_eq!(first.node.as_deref(), Some("a"));

        let second = stream.next().await.unwrap();
        assert_eq!(second.kind, RunEventKind::Completed);
    }

    #[tokio::test]
    async fn test_full_subscriber_drops_newest() {
        let observers = ObserverSet::new();
        let mut stream = observers.subscribe(1);

        observers.emit(RunEvent::new(RunEventKind::NodeStart, "run-1"));
        observers.emit(RunEvent::new(RunEventKind::NodeEnd, "run-1"));
        observers.emit(RunEvent::new(RunEventKind::Completed, "run-1"));

        // Only the first event fit in the buffer.
        let event = stream.next().await.unwrap();
        assert_eq!(event.kind, RunEventKind::NodeStart);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let observers = ObserverSet::new();
        let stream = observers.subscribe(1);
        drop(stream);

        observers.emit(RunEvent::new(RunEventKind::NodeStart, "run-1"));
        assert!(observers.senders.lock().is_empty());
    }
}
