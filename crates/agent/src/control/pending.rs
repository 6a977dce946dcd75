//! Pending approval / ask registries.
//!
//! Each outstanding round-trip maps a request id to a one-shot reply
//! mailbox; delivering a response removes the entry and fires the sender,
//! so exactly one waiter unblocks. Responses for unknown ids are dropped
//! without blocking anything.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::oneshot;

use nebo_protocol::{ApprovalResponsePayload, AskResponsePayload};

/// Map from request id to a one-shot reply mailbox. Ownership of the
/// sender transfers to the resolving side on dispatch.
pub struct PendingMap<T> {
    inner: RwLock<HashMap<String, oneshot::Sender<T>>>,
}

impl<T> PendingMap<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new pending request and return its mailbox.
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.inner.write().insert(request_id.to_owned(), tx);
        rx
    }

    /// Deliver a response. Returns `true` when a waiter was resolved;
    /// unknown ids return `false` and the value is dropped.
    pub fn resolve(&self, request_id: &str, value: T) -> bool {
        match self.inner.write().remove(request_id) {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                tracing::debug!(request_id, "dropping response for unknown request id");
                false
            }
        }
    }

    /// Abandon a wait (ctx cancelled or timed out).
    pub fn remove(&self, request_id: &str) {
        self.inner.write().remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl<T> Default for PendingMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending tool-approval round-trips.
pub type Approvals = PendingMap<ApprovalResponsePayload>;

/// Pending interactive ask round-trips.
pub type Asks = PendingMap<AskResponsePayload>;
