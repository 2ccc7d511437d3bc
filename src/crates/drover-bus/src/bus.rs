//! The in-process bus
//!
//! Routing rules:
//!
//! - `send` stamps a monotonic id, records the envelope in the history ring,
//!   and delivers. Broadcast (`to == "*"`) delivers a per-peer copy to every
//!   peer except the sender.
//! - Delivery to a peer with a handler spawns the handler on a detached task
//!   with a background cancellation scope, so a handler whose caller
//!   abandoned the wait may still finish. The handler's reply is re-stamped
//!   (`reply_to`, `from`, `to`, `created_at`) and enqueued on the requester's
//!   inbox non-blockingly; a handler error becomes a synthesized error-typed
//!   reply carrying `{error}`.
//! - Delivery to a handler-less peer enqueues on its bounded inbox; a full
//!   inbox fails immediately with back-pressure, never blocking.
//!
//! `send_and_wait` drains the sender's own inbox until the correlated reply
//! arrives; stray envelopes are re-enqueued non-blockingly and dropped when
//! the inbox is full (the bounded-memory trade-off, preferred over an
//! unbounded queue).

use crate::envelope::{
    AnswerPayload, Envelope, EnvelopeType, QuestionPayload, ResultPayload, TaskPayload, BROADCAST,
};
use crate::error::{BusError, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tooling::logging::timed;
use tooling::CancelToken;
use tracing::{debug, warn};

/// Async peer handler; returning `Ok(Some(reply))` sends a correlated reply.
pub type PeerHandler = Arc<
    dyn Fn(Envelope) -> BoxFuture<'static, std::result::Result<Option<Envelope>, String>>
        + Send
        + Sync,
>;

/// Registration record for a peer.
#[derive(Clone)]
pub struct PeerSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub handler: Option<PeerHandler>,
}

impl PeerSpec {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            capabilities: Vec::new(),
            handler: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<Option<Envelope>, String>>
            + Send
            + 'static,
    {
        self.handler = Some(Arc::new(move |envelope| {
            let fut: BoxFuture<'static, std::result::Result<Option<Envelope>, String>> =
                Box::pin(handler(envelope));
            fut
        }));
        self
    }
}

/// Bus tuning knobs.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Bounded inbox capacity per peer.
    pub inbox_size: usize,

    /// History ring capacity; the oldest 25% is discarded in bulk when full.
    pub history_cap: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbox_size: 512,
            history_cap: 4096,
        }
    }
}

struct PeerEntry {
    spec: PeerSpec,
    tx: mpsc::Sender<Envelope>,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope>>>;

struct DirectPair {
    /// Sender keyed by recipient id.
    senders: HashMap<String, mpsc::Sender<Envelope>>,
    /// Receiver keyed by owner id.
    receivers: HashMap<String, SharedReceiver>,
}

#[derive(Default)]
struct BusInner {
    peers: HashMap<String, PeerEntry>,
    receivers: HashMap<String, SharedReceiver>,
    direct: HashMap<(String, String), DirectPair>,
}

/// In-process, back-pressured envelope router.
pub struct Bus {
    config: BusConfig,
    inner: RwLock<BusInner>,
    history: Mutex<Vec<Envelope>>,
    seq: AtomicU64,
    closed: AtomicBool,
    /// Self-handle for detached handler tasks.
    weak: std::sync::Weak<Bus>,
}

impl Bus {
    pub fn new(config: BusConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            inner: RwLock::new(BusInner::default()),
            history: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            weak: weak.clone(),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(BusConfig::default())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }

    /// Register a peer and allocate its bounded inbox.
    pub fn register(&self, spec: PeerSpec) -> Result<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write();

        if inner.peers.contains_key(&spec.id) {
            return Err(BusError::PeerExists(spec.id));
        }

        let (tx, rx) = mpsc::channel(self.config.inbox_size);
        inner
            .receivers
            .insert(spec.id.clone(), Arc::new(tokio::sync::Mutex::new(rx)));
        inner.peers.insert(spec.id.clone(), PeerEntry { spec, tx });
        Ok(())
    }

    /// Remove a peer and close its inbox.
    pub fn unregister(&self, id: &str) {
        let mut inner = self.inner.write();
        inner.peers.remove(id);
        inner.receivers.remove(id);
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.inner.read().peers.keys().cloned().collect()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.read().peers.contains_key(id)
    }

    /// Stamp a monotonic envelope id: `msg_<nanos>_<seq>`.
    fn stamp(&self, envelope: &mut Envelope) {
        if envelope.id.is_empty() {
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);
            envelope.id = format!("msg_{}_{}", nanos, seq);
        }
    }

    fn record(&self, envelope: &Envelope) {
        let mut history = self.history.lock();
        if history.len() >= self.config.history_cap {
            // Bulk shift of the oldest quarter; the new envelope always fits.
            let drop_n = (self.config.history_cap / 4).max(1);
            history.drain(0..drop_n);
        }
        history.push(envelope.clone());
    }

    /// Snapshot of the history ring, oldest first.
    pub fn history(&self) -> Vec<Envelope> {
        self.history.lock().clone()
    }

    /// Route an envelope. Returns the stamped copy.
    pub fn send(&self, mut envelope: Envelope) -> Result<Envelope> {
        self.ensure_open()?;
        self.stamp(&mut envelope);
        if envelope.created_at.timestamp() == 0 {
            envelope.created_at = Utc::now();
        }
        self.record(&envelope);

        if envelope.to == BROADCAST {
            let recipients: Vec<String> = {
                let inner = self.inner.read();
                inner
                    .peers
                    .keys()
                    .filter(|id| **id != envelope.from)
                    .cloned()
                    .collect()
            };
            for recipient in recipients {
                let mut copy = envelope.clone();
                copy.to = recipient;
                if let Err(e) = self.deliver(copy) {
                    // A slow peer must not fail the whole broadcast.
                    debug!(error = %e, "broadcast delivery dropped");
                }
            }
            return Ok(envelope);
        }

        self.deliver(envelope.clone())?;
        Ok(envelope)
    }

    fn deliver(&self, envelope: Envelope) -> Result<()> {
        let (handler, tx) = {
            let inner = self.inner.read();
            let entry = inner
                .peers
                .get(&envelope.to)
                .ok_or_else(|| BusError::RecipientNotFound(envelope.to.clone()))?;
            (entry.spec.handler.clone(), entry.tx.clone())
        };

        match handler {
            Some(handler) => {
                // Detached: handlers run under a background scope, not the
                // caller's cancellation context.
                let Some(bus) = self.weak.upgrade() else {
                    return Err(BusError::Closed);
                };
                let peer_id = envelope.to.clone();
                tokio::spawn(async move {
                    let request = envelope.clone();
                    let result = timed(&format!("handler:{}", peer_id), handler(envelope)).await;
                    bus.finish_handler(&peer_id, request, result);
                });
                Ok(())
            }
            None => tx.try_send(envelope).map_err(|e| match e {
                mpsc::error::TrySendError::Full(envelope) => BusError::InboxFull(envelope.to),
                mpsc::error::TrySendError::Closed(envelope) => {
                    BusError::RecipientNotFound(envelope.to)
                }
            }),
        }
    }

    /// Correlate and route a handler's outcome back to the requester.
    fn finish_handler(
        &self,
        peer_id: &str,
        request: Envelope,
        result: std::result::Result<Option<Envelope>, String>,
    ) {
        let mut reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(message) => Envelope::new(EnvelopeType::Error, peer_id, request.from.as_str())
                .with_subject(request.subject.clone())
                .with_body(json!({"error": message})),
        };

        // The bus owns correlation: handler-set routing fields are
        // overwritten.
        reply.reply_to = Some(request.id.clone());
        reply.from = peer_id.to_string();
        reply.to = request.from.clone();
        reply.created_at = Utc::now();
        self.stamp(&mut reply);
        self.record(&reply);

        let tx = {
            let inner = self.inner.read();
            inner.peers.get(&reply.to).map(|entry| entry.tx.clone())
        };
        match tx {
            Some(tx) => {
                if tx.try_send(reply).is_err() {
                    warn!(peer = %request.from, "requester inbox full, reply dropped");
                }
            }
            None => debug!(peer = %request.from, "requester gone, reply dropped"),
        }
    }

    /// Receive the next envelope from a peer's own inbox.
    pub async fn recv(&self, cancel: &CancelToken, peer_id: &str) -> Result<Envelope> {
        let receiver = {
            let inner = self.inner.read();
            inner
                .receivers
                .get(peer_id)
                .cloned()
                .ok_or_else(|| BusError::RecipientNotFound(peer_id.to_string()))?
        };

        let mut rx = receiver.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(BusError::NoReply(peer_id.to_string())),
            received = rx.recv() => received.ok_or(BusError::Closed),
        }
    }

    /// Send, then drain the sender's inbox until the correlated reply
    /// arrives.
    ///
    /// Envelopes that are not the expected reply are re-enqueued to the same
    /// inbox non-blockingly; when the inbox is full the stray is dropped.
    pub async fn send_and_wait(&self, cancel: &CancelToken, envelope: Envelope) -> Result<Envelope> {
        let sent = self.send(envelope)?;

        let (receiver, tx) = {
            let inner = self.inner.read();
            let receiver = inner
                .receivers
                .get(&sent.from)
                .cloned()
                .ok_or_else(|| BusError::RecipientNotFound(sent.from.clone()))?;
            let tx = inner
                .peers
                .get(&sent.from)
                .map(|entry| entry.tx.clone())
                .ok_or_else(|| BusError::RecipientNotFound(sent.from.clone()))?;
            (receiver, tx)
        };

        let mut rx = receiver.lock().await;
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return Err(BusError::NoReply(sent.id.clone())),
                received = rx.recv() => received.ok_or(BusError::Closed)?,
            };

            if received.reply_to.as_deref() == Some(sent.id.as_str()) {
                return Ok(received);
            }

            if tx.try_send(received).is_err() {
                debug!(peer = %sent.from, "inbox full while re-enqueueing stray envelope, dropped");
            }
            // The stray went to the back of our own queue; yield so this
            // drain loop cannot monopolize the executor while the reply is
            // still in flight.
            tokio::task::yield_now().await;
        }
    }

    /// Delegate a task and wait for its [`ResultPayload`].
    ///
    /// A handler failure (error-typed reply) comes back as an unsuccessful
    /// payload rather than a bus error.
    pub async fn delegate_task(
        &self,
        cancel: &CancelToken,
        from: &str,
        to: &str,
        subject: &str,
        task: TaskPayload,
    ) -> Result<ResultPayload> {
        let envelope = Envelope::new(EnvelopeType::TaskRequest, from, to)
            .with_subject(subject)
            .with_body(serde_json::to_value(&task)?);

        let reply = self.send_and_wait(cancel, envelope).await?;

        if reply.envelope_type == EnvelopeType::Error {
            let message = reply.body["error"].as_str().unwrap_or("handler failed");
            return Ok(ResultPayload::failed(message));
        }
        Ok(serde_json::from_value(reply.body)?)
    }

    /// Ask a question and wait for its [`AnswerPayload`].
    pub async fn ask(
        &self,
        cancel: &CancelToken,
        from: &str,
        to: &str,
        question: &str,
    ) -> Result<AnswerPayload> {
        let envelope = Envelope::new(EnvelopeType::Question, from, to)
            .with_subject("question")
            .with_body(serde_json::to_value(QuestionPayload {
                question: question.to_string(),
            })?);

        let reply = self.send_and_wait(cancel, envelope).await?;

        if reply.envelope_type == EnvelopeType::Error {
            let message = reply.body["error"].as_str().unwrap_or("handler failed");
            return Ok(AnswerPayload {
                answer: json!({"error": message}),
            });
        }
        Ok(serde_json::from_value(reply.body)?)
    }

    /// Idempotently create a dedicated bidirectional channel pair between
    /// two peers, keyed by the unordered pair.
    pub fn direct_channel_between(&self, a: &str, b: &str, capacity: usize) -> Result<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write();

        if !inner.peers.contains_key(a) {
            return Err(BusError::RecipientNotFound(a.to_string()));
        }
        if !inner.peers.contains_key(b) {
            return Err(BusError::RecipientNotFound(b.to_string()));
        }

        let key = pair_key(a, b);
        if inner.direct.contains_key(&key) {
            return Ok(());
        }

        let (a_to_b_tx, a_to_b_rx) = mpsc::channel(capacity.max(1));
        let (b_to_a_tx, b_to_a_rx) = mpsc::channel(capacity.max(1));

        let mut senders = HashMap::new();
        senders.insert(b.to_string(), a_to_b_tx);
        senders.insert(a.to_string(), b_to_a_tx);

        let mut receivers: HashMap<String, SharedReceiver> = HashMap::new();
        receivers.insert(b.to_string(), Arc::new(tokio::sync::Mutex::new(a_to_b_rx)));
        receivers.insert(a.to_string(), Arc::new(tokio::sync::Mutex::new(b_to_a_rx)));

        inner.direct.insert(key, DirectPair { senders, receivers });
        Ok(())
    }

    /// Send over the direct channel, bypassing the router and history.
    pub fn direct_send(&self, from: &str, to: &str, mut envelope: Envelope) -> Result<()> {
        self.ensure_open()?;
        self.stamp(&mut envelope);

        let sender = {
            let inner = self.inner.read();
            inner
                .direct
                .get(&pair_key(from, to))
                .and_then(|pair| pair.senders.get(to))
                .cloned()
                .ok_or_else(|| BusError::NoDirectChannel {
                    a: from.to_string(),
                    b: to.to_string(),
                })?
        };

        sender.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::InboxFull(to.to_string()),
            mpsc::error::TrySendError::Closed(_) => BusError::Closed,
        })
    }

    /// Receive from this peer's end of a direct channel.
    pub async fn direct_recv(
        &self,
        cancel: &CancelToken,
        me: &str,
        other: &str,
    ) -> Result<Envelope> {
        let receiver = {
            let inner = self.inner.read();
            inner
                .direct
                .get(&pair_key(me, other))
                .and_then(|pair| pair.receivers.get(me))
                .cloned()
                .ok_or_else(|| BusError::NoDirectChannel {
                    a: me.to_string(),
                    b: other.to_string(),
                })?
        };

        let mut rx = receiver.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(BusError::NoReply(me.to_string())),
            received = rx.recv() => received.ok_or(BusError::Closed),
        }
    }

    /// Close the bus: all inboxes and direct channels are dropped.
    /// Idempotent; subsequent sends fail with [`BusError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.write();
        inner.peers.clear();
        inner.receivers.clear();
        inner.direct.clear();
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::time::Duration;

    fn plain_peer(id: &str) -> PeerSpec {
        PeerSpec::new(id)
    }

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("a")).unwrap();

        let err = bus.register(plain_peer("a")).unwrap_err();
        assert!(matches!(err, BusError::PeerExists(_)));

        bus.unregister("a");
        bus.register(plain_peer("a")).unwrap();
    }

    #[tokio::test]
    async fn test_send_stamps_id_and_records_history() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("a")).unwrap();
        bus.register(plain_peer("b")).unwrap();

        let sent = bus
            .send(Envelope::new(EnvelopeType::Event, "a", "b").with_subject("ping"))
            .unwrap();

        assert!(sent.id.starts_with("msg_"));
        let history = bus.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, sent.id);
    }

    #[tokio::test]
    async fn test_send_to_unknown_recipient() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("a")).unwrap();

        let err = bus
            .send(Envelope::new(EnvelopeType::Event, "a", "ghost"))
            .unwrap_err();
        assert!(matches!(err, BusError::RecipientNotFound(_)));
    }

    #[tokio::test]
    async fn test_inbox_backpressure() {
        let bus = Bus::new(BusConfig {
            inbox_size: 2,
            history_cap: 64,
        });
        bus.register(plain_peer("a")).unwrap();
        bus.register(plain_peer("b")).unwrap();

        for _ in 0..2 {
            bus.send(Envelope::new(EnvelopeType::Event, "a", "b")).unwrap();
        }

        // Third send fails immediately without blocking or mutating the inbox.
        let err = bus
            .send(Envelope::new(EnvelopeType::Event, "a", "b"))
            .unwrap_err();
        assert!(matches!(err, BusError::InboxFull(_)));

        // The two queued envelopes are still delivered in FIFO order.
        let cancel = CancelToken::new();
        bus.recv(&cancel, "b").await.unwrap();
        bus.recv(&cancel, "b").await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_order_per_sender() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("a")).unwrap();
        bus.register(plain_peer("b")).unwrap();

        for i in 0..5 {
            bus.send(
                Envelope::new(EnvelopeType::Event, "a", "b").with_subject(format!("m{}", i)),
            )
            .unwrap();
        }

        let cancel = CancelToken::new();
        for i in 0..5 {
            let received = bus.recv(&cancel, "b").await.unwrap();
            assert_eq!(received.subject, format!("m{}", i));
        }
    }

    #[tokio::test]
    async fn test_broadcast_copies_per_peer() {
        let bus = Bus::with_defaults();
        for id in ["a", "b", "c"] {
            bus.register(plain_peer(id)).unwrap();
        }

        bus.send(
            Envelope::new(EnvelopeType::Broadcast, "a", BROADCAST).with_subject("everyone"),
        )
        .unwrap();

        let cancel = CancelToken::new();
        let to_b = bus.recv(&cancel, "b").await.unwrap();
        let to_c = bus.recv(&cancel, "c").await.unwrap();
        assert_eq!(to_b.subject, "everyone");
        assert_eq!(to_c.subject, "everyone");
        assert_eq!(to_b.to, "b");
        assert_eq!(to_c.to, "c");

        // The sender did not get a copy.
        let sender_cancel = CancelToken::new();
        sender_cancel.cancel();
        eprintln!("DIAG is_cancelled={}", sender_cancel.is_cancelled());
        assert!(bus.recv(&sender_cancel, "a").await.is_err());
        eprintln!("DIAG final recv returned");
    }

    #[tokio::test]
    async fn test_delegate_task_round_trip() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("researcher")).unwrap();
        bus.register(PeerSpec::new("writer").with_handler(|envelope: Envelope| async move {
            let mut output = Map::new();
            output.insert("response".to_string(), json!("draft"));
            let reply = Envelope::new(EnvelopeType::TaskResult, "writer", envelope.from.as_str())
                .with_body(serde_json::to_value(ResultPayload::ok(output)).map_err(|e| e.to_string())?);
            Ok(Some(reply))
        }))
        .unwrap();

        let result = bus
            .delegate_task(
                &CancelToken::new(),
                "researcher",
                "writer",
                "draft",
                TaskPayload::new("x"),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output["response"], json!("draft"));

        // History holds exactly the request and the reply, correlated.
        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].reply_to.as_deref(), Some(history[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_reply() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("asker")).unwrap();
        bus.register(
            PeerSpec::new("flaky")
                .with_handler(|_envelope: Envelope| async move { Err("overloaded".to_string()) }),
        )
        .unwrap();

        let result = bus
            .delegate_task(
                &CancelToken::new(),
                "asker",
                "flaky",
                "work",
                TaskPayload::new("x"),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("overloaded"));
    }

    #[tokio::test]
    async fn test_ask_answer_round_trip() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("student")).unwrap();
        bus.register(PeerSpec::new("teacher").with_handler(|envelope: Envelope| async move {
            let question: QuestionPayload =
                serde_json::from_value(envelope.body.clone()).map_err(|e| e.to_string())?;
            let reply = Envelope::new(EnvelopeType::Answer, "teacher", envelope.from.as_str()).with_body(
                serde_json::to_value(AnswerPayload {
                    answer: json!(format!("re: {}", question.question)),
                })
                .map_err(|e| e.to_string())?,
            );
            Ok(Some(reply))
        }))
        .unwrap();

        let answer = bus
            .ask(&CancelToken::new(), "student", "teacher", "why is the sky blue?")
            .await
            .unwrap();
        assert_eq!(answer.answer, json!("re: why is the sky blue?"));
    }

    #[tokio::test]
    async fn test_send_and_wait_reenqueues_strays() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("a")).unwrap();
        bus.register(PeerSpec::new("slow").with_handler(|envelope: Envelope| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(Some(
                Envelope::new(EnvelopeType::Answer, "slow", envelope.from.as_str())
                    .with_body(json!({"answer": "done"})),
            ))
        }))
        .unwrap();
        bus.register(plain_peer("chatty")).unwrap();

        // A stray lands in a's inbox before the reply arrives.
        bus.send(Envelope::new(EnvelopeType::Event, "chatty", "a").with_subject("stray"))
            .unwrap();

        let answer = bus
            .ask(&CancelToken::new(), "a", "slow", "hmm?")
            .await
            .unwrap();
        assert_eq!(answer.answer, json!("done"));

        // The stray survived the drain.
        let stray = bus.recv(&CancelToken::new(), "a").await.unwrap();
        assert_eq!(stray.subject, "stray");
    }

    #[tokio::test]
    async fn test_send_and_wait_cancellation() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("a")).unwrap();
        bus.register(plain_peer("silent")).unwrap();

        let cancel = CancelToken::new();
        let waiter = Arc::clone(&bus);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            waiter
                .send_and_wait(
                    &token,
                    Envelope::new(EnvelopeType::Question, "a", "silent"),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait should return after cancel")
            .unwrap();
        assert!(matches!(result, Err(BusError::NoReply(_))));
    }

    #[tokio::test]
    async fn test_direct_channel_is_idempotent_and_bidirectional() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("a")).unwrap();
        bus.register(plain_peer("b")).unwrap();

        bus.direct_channel_between("a", "b", 8).unwrap();
        // Same unordered pair: no-op.
        bus.direct_channel_between("b", "a", 8).unwrap();

        bus.direct_send("a", "b", Envelope::new(EnvelopeType::Event, "a", "b").with_subject("hi"))
            .unwrap();
        bus.direct_send("b", "a", Envelope::new(EnvelopeType::Event, "b", "a").with_subject("yo"))
            .unwrap();

        let cancel = CancelToken::new();
        assert_eq!(bus.direct_recv(&cancel, "b", "a").await.unwrap().subject, "hi");
        assert_eq!(bus.direct_recv(&cancel, "a", "b").await.unwrap().subject, "yo");
    }

    #[tokio::test]
    async fn test_direct_send_without_channel() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("a")).unwrap();
        bus.register(plain_peer("b")).unwrap();

        let err = bus
            .direct_send("a", "b", Envelope::new(EnvelopeType::Event, "a", "b"))
            .unwrap_err();
        assert!(matches!(err, BusError::NoDirectChannel { .. }));
    }

    #[tokio::test]
    async fn test_history_ring_discards_oldest_quarter() {
        let bus = Bus::new(BusConfig {
            inbox_size: 512,
            history_cap: 8,
        });
        bus.register(plain_peer("a")).unwrap();
        bus.register(plain_peer("b")).unwrap();

        for i in 0..9 {
            bus.send(
                Envelope::new(EnvelopeType::Event, "a", "b").with_subject(format!("m{}", i)),
            )
            .unwrap();
            // Keep the inbox drained so back-pressure never interferes.
            bus.recv(&CancelToken::new(), "b").await.unwrap();
        }

        let history = bus.history();
        // Cap 8: on the 9th record the oldest 2 were dropped in one shift.
        assert_eq!(history.len(), 7);
        assert_eq!(history.first().unwrap().subject, "m2");
        assert_eq!(history.last().unwrap().subject, "m8");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_sends() {
        let bus = Bus::with_defaults();
        bus.register(plain_peer("a")).unwrap();
        bus.register(plain_peer("b")).unwrap();

        bus.close();
        bus.close();

        let err = bus
            .send(Envelope::new(EnvelopeType::Event, "a", "b"))
            .unwrap_err();
        assert!(matches!(err, BusError::Closed));
    }
}
