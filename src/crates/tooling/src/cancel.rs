//! Cooperative cancellation tokens
//!
//! Every public operation in the workspace accepts a [`CancelToken`]. The
//! token carries a cancellation signal that propagates to child work: callers
//! cancel the token, and every suspension point that selects against
//! [`CancelToken::cancelled`] returns promptly.
//!
//! Tokens form a tree. A child created with [`CancelToken::child`] observes
//! its own cancellation and that of every ancestor, but cancelling a child
//! never affects the parent. This is what the parallel team strategy uses to
//! cancel siblings under fail-fast without tearing down the caller.

use std::sync::Arc;
use tokio::sync::watch;

/// A clonable cancellation signal.
///
/// Clones share the same underlying signal; [`child`](Self::child) creates a
/// new signal linked to this one.
///
/// # Example
///
/// ```rust
/// use tooling::CancelToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let token = CancelToken::new();
/// let child = token.child();
///
/// token.cancel();
/// assert!(child.is_cancelled());
/// child.cancelled().await; // resolves immediately
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    ancestors: Vec<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Create a root token that is not cancelled.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            ancestors: Vec::new(),
        }
    }

    /// Create a child token.
    ///
    /// The child is cancelled when either it or any ancestor is cancelled.
    pub fn child(&self) -> Self {
        let (tx, _rx) = watch::channel(false);
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.tx.subscribe());
        Self {
            tx: Arc::new(tx),
            ancestors,
        }
    }

    /// Signal cancellation to this token and all of its children.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether this token (or any ancestor) has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow() || self.ancestors.iter().any(|rx| *rx.borrow())
    }

    /// Resolve once this token (or any ancestor) is cancelled.
    ///
    /// Intended for use in `tokio::select!` arms guarding suspension points.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }

        let mut watchers = Vec::with_capacity(self.ancestors.len() + 1);
        watchers.push(self.tx.subscribe());
        watchers.extend(self.ancestors.iter().cloned());

        let waits = watchers.into_iter().map(|mut rx| {
            Box::pin(async move {
                loop {
                    if *rx.borrow() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // Sender dropped without cancelling; this branch can
                        // never fire.
                        std::future::pending::<()>().await;
                    }
                }
            })
        });

        futures::future::select_all(waits).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
