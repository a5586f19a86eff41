//! Subscription Facade (§4.6/§4.7): the public surface a consumer of this
//! crate's client half actually calls. Combines the [`Coordinator`] and
//! [`Supervisor`] into `connect` / `subscribe` / `unsubscribe` / `request`,
//! hiding the reconnect machinery and `uid` bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::{OutboundEnvelope, Query};

use super::coordinator::{await_reply, Coordinator, CoordinatorError, DEFAULT_REQUEST_TIMEOUT};
use super::supervisor::{ConnectionHandle, OnConnect, OnDisconnect, Supervisor};

/// A live subscription's event stream. Dropping it unregisters the `uid`
/// from the coordinator so a stray server frame for a dead subscription is
/// silently ignored rather than leaking the channel.
pub struct Subscription {
    uid: String,
    receiver: mpsc::UnboundedReceiver<OutboundEnvelope>,
    coordinator: Arc<Coordinator>,
}

impl Subscription {
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Await the next `init` or follow-up frame for this subscription.
    pub async fn next(&mut self) -> Option<OutboundEnvelope> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.coordinator.unregister(&self.uid);
    }
}

/// Thin wrapper tying a [`Coordinator`] to whatever socket the supervisor
/// currently has live. Resubscription after a reconnect is the caller's
/// responsibility (typically from inside an `on_connect` hook) — this type
/// deliberately keeps no memory of past subscriptions (§4.7).
pub struct GatewayClient {
    coordinator: Arc<Coordinator>,
    connection: ConnectionHandle,
}

impl GatewayClient {
    /// Build a client and its backing supervisor. The returned supervisor
    /// must be `tokio::spawn`ed by the caller to actually start connecting;
    /// this split lets the caller attach `on_connect`/`on_disconnect` hooks
    /// before the reconnect loop begins.
    pub fn new(url: url::Url) -> (Self, Supervisor) {
        let coordinator = Arc::new(Coordinator::new());
        let supervisor = Supervisor::new(url, coordinator.clone());
        let connection = supervisor.handle();
        (
            Self {
                coordinator,
                connection,
            },
            supervisor,
        )
    }

    pub fn with_hooks(
        url: url::Url,
        on_connect: OnConnect,
        on_disconnect: OnDisconnect,
    ) -> (Self, Supervisor) {
        let coordinator = Arc::new(Coordinator::new());
        let supervisor = Supervisor::new(url, coordinator.clone())
            .on_connect(on_connect)
            .on_disconnect(on_disconnect);
        let connection = supervisor.handle();
        (
            Self {
                coordinator,
                connection,
            },
            supervisor,
        )
    }

    /// Outbound requests carry their fields top-level (`collection`, `item`,
    /// `query`, `access_token`, ...) — the same shape the server's
    /// [`crate::protocol::InboundEnvelope`] parses, which is why this sends
    /// a bare JSON object rather than an [`OutboundEnvelope`] (that type's
    /// fixed field set models the server's *replies*, not client requests).
    async fn send_value(&self, value: Value) -> Result<(), CoordinatorError> {
        let Some(sink) = self.connection.sink().await else {
            return Err(CoordinatorError::Closed);
        };
        sink.send_value(&value);
        Ok(())
    }

    /// `AUTH` with an access token already in hand (§4.2 row "client:
    /// access token").
    pub async fn authenticate(
        &self,
        access_token: &str,
        timeout: Duration,
    ) -> Result<OutboundEnvelope, CoordinatorError> {
        let (uid, rx) = self.coordinator.register_request();
        self.send_value(serde_json::json!({
            "type": "AUTH",
            "uid": uid,
            "access_token": access_token,
        }))
        .await
        .inspect_err(|_| self.coordinator.unregister(&uid))?;
        let result = await_reply(rx, timeout).await;
        self.coordinator.unregister(&uid);
        result
    }

    /// `SUBSCRIBE` (§4.4). Returns a live [`Subscription`] whose `next()`
    /// yields the `init` frame first, then every follow-up mutation frame.
    pub async fn subscribe(
        &self,
        collection: &str,
        item: Option<Value>,
        query: Option<Query>,
        status: bool,
    ) -> Result<Subscription, CoordinatorError> {
        let uid = self.coordinator.next_uid();
        let receiver = self.coordinator.register_subscription(uid.clone());
        self.send_value(serde_json::json!({
            "type": "SUBSCRIBE",
            "uid": uid,
            "collection": collection,
            "item": item,
            "query": query,
            "status": status,
        }))
        .await
        .inspect_err(|_| self.coordinator.unregister(&uid))?;

        Ok(Subscription {
            uid,
            receiver,
            coordinator: self.coordinator.clone(),
        })
    }

    /// `UNSUBSCRIBE` for a subscription previously returned by
    /// [`Self::subscribe`]. Dropping the [`Subscription`] value only tears
    /// down the local bookkeeping — this additionally tells the server.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), CoordinatorError> {
        self.send_value(serde_json::json!({
            "type": "UNSUBSCRIBE",
            "uid": subscription.uid,
        }))
        .await
    }

    /// A one-off `ITEMS` read (§6 wire protocol table), resolved like any
    /// other request/response pair with the default 5 s timeout.
    pub async fn items(
        &self,
        collection: &str,
        item: Option<Value>,
        query: Option<Query>,
    ) -> Result<OutboundEnvelope, CoordinatorError> {
        let (uid, rx) = self.coordinator.register_request();
        self.send_value(serde_json::json!({
            "type": "ITEMS",
            "uid": uid,
            "collection": collection,
            "item": item,
            "query": query,
        }))
        .await
        .inspect_err(|_| self.coordinator.unregister(&uid))?;
        let result = await_reply(rx, DEFAULT_REQUEST_TIMEOUT).await;
        self.coordinator.unregister(&uid);
        result
    }
}
