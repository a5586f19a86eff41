//! Request/Response Coordinator (§4.6): multiplexes three call patterns
//! over one socket by `uid` correlation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::OutboundEnvelope;

/// Default timeout for a request/response pair (§4.6).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("request timed out waiting for a reply")]
    Timeout,
    #[error("connection closed before a reply arrived")]
    Closed,
}

enum PendingEntry {
    /// Request/response (§4.6 row 1): resolved exactly once, then removed.
    Request(oneshot::Sender<OutboundEnvelope>),
    /// Subscription (§4.6 row 2): every inbound frame with this `uid`
    /// forwards to the channel until the caller drops the receiver or
    /// explicitly unregisters it (on UNSUBSCRIBE).
    Subscription(mpsc::UnboundedSender<OutboundEnvelope>),
}

/// Assigns monotonically increasing `uid`s (never reset for the process's
/// lifetime, per §4.6) and routes inbound frames back to whichever waiter
/// registered that `uid`.
pub struct Coordinator {
    next_uid: AtomicU64,
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            next_uid: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_uid(&self) -> String {
        self.next_uid.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Register a one-shot request; returns the `uid` to send and a
    /// receiver that resolves when a matching reply arrives.
    pub fn register_request(&self) -> (String, oneshot::Receiver<OutboundEnvelope>) {
        let uid = self.next_uid();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(uid.clone(), PendingEntry::Request(tx));
        (uid, rx)
    }

    /// Register a subscription callback channel under a caller-chosen
    /// `uid` (the one sent on the `SUBSCRIBE`/`UNSUBSCRIBE` frame itself).
    pub fn register_subscription(&self, uid: String) -> mpsc::UnboundedReceiver<OutboundEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().unwrap().insert(uid, PendingEntry::Subscription(tx));
        rx
    }

    pub fn unregister(&self, uid: &str) {
        self.pending.lock().unwrap().remove(uid);
    }

    /// Route an inbound frame by its `uid`. Returns `true` if a waiter was
    /// found (matching §4.6's "resolve by inbound `uid`").
    pub fn dispatch(&self, envelope: OutboundEnvelope) -> bool {
        let Some(uid) = envelope.uid.clone() else {
            return false;
        };
        let mut pending = self.pending.lock().unwrap();
        match pending.get(&uid) {
            Some(PendingEntry::Subscription(tx)) => {
                let _ = tx.send(envelope);
                true
            }
            Some(PendingEntry::Request(_)) => {
                if let Some(PendingEntry::Request(tx)) = pending.remove(&uid) {
                    let _ = tx.send(envelope);
                }
                true
            }
            None => false,
        }
    }

    /// Fail every pending request/subscription waiter — called when the
    /// underlying socket drops, so callers don't hang forever.
    pub fn fail_all(&self) {
        self.pending.lock().unwrap().clear();
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Await a registered request's reply with the default 5 s timeout (§4.6).
pub async fn await_reply(
    rx: oneshot::Receiver<OutboundEnvelope>,
    timeout: Duration,
) -> Result<OutboundEnvelope, CoordinatorError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(envelope)) => Ok(envelope),
        Ok(Err(_)) => Err(CoordinatorError::Closed),
        Err(_) => Err(CoordinatorError::Timeout),
    }
}
