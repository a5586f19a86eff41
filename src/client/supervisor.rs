//! Connection Supervisor (§4.7): owns a single outbound socket, reconnects
//! after a fixed delay on drop, and leaves resubscription to the caller via
//! an `on_connect` hook — the supervisor itself holds no subscription state.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::protocol::OutboundEnvelope;

use super::coordinator::Coordinator;

/// Delay between a dropped connection and the next reconnect attempt (§4.7:
/// "reconnect after a fixed delay" — no backoff, matching the original's
/// deliberately simple policy).
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Called once per successful connect, before any caller-visible "ready"
/// state — the natural place to re-issue AUTH and re-subscribe.
pub type OnConnect = Arc<dyn Fn(OutboundSink) + Send + Sync>;
pub type OnDisconnect = Arc<dyn Fn() + Send + Sync>;

/// A cheaply-cloneable handle for sending frames on whatever socket is
/// currently live. Sends silently no-op once the socket has dropped and
/// before the next reconnect completes (mirroring the server's `safe_send`
/// posture of never panicking on a stale destination).
#[derive(Clone)]
pub struct OutboundSink {
    tx: mpsc::UnboundedSender<String>,
}

impl OutboundSink {
    pub fn send(&self, envelope: &OutboundEnvelope) {
        let _ = self.tx.send(envelope_to_json(envelope));
    }

    /// Send a raw client→server request frame (§3 "Message envelope").
    /// Outbound requests carry `collection`/`item`/`query`/etc. as top-level
    /// fields — the same shape [`crate::protocol::InboundEnvelope`] parses
    /// them as server-side — which is why this takes a bare [`Value`]
    /// instead of [`OutboundEnvelope`] (that type's fixed field set is for
    /// the server's *replies*, not client requests).
    pub fn send_value(&self, value: &Value) {
        let _ = self.tx.send(value.to_string());
    }

    pub fn send_raw(&self, text: String) {
        let _ = self.tx.send(text);
    }
}

fn envelope_to_json(envelope: &OutboundEnvelope) -> String {
    serde_json::to_string(envelope).unwrap_or_default()
}

/// Drives the reconnect loop until `shutdown` fires. Every inbound frame is
/// routed through `coordinator.dispatch`; frames that don't match a waiter
/// are silently dropped (the facade layer is responsible for exposing a
/// catch-all stream if a caller needs one).
pub struct Supervisor {
    url: url::Url,
    coordinator: Arc<Coordinator>,
    on_connect: Option<OnConnect>,
    on_disconnect: Option<OnDisconnect>,
    current_sink: Arc<RwLock<Option<OutboundSink>>>,
}

impl Supervisor {
    pub fn new(url: url::Url, coordinator: Arc<Coordinator>) -> Self {
        Self {
            url,
            coordinator,
            on_connect: None,
            on_disconnect: None,
            current_sink: Arc::new(RwLock::new(None)),
        }
    }

    pub fn on_connect(mut self, hook: OnConnect) -> Self {
        self.on_connect = Some(hook);
        self
    }

    pub fn on_disconnect(mut self, hook: OnDisconnect) -> Self {
        self.on_disconnect = Some(hook);
        self
    }

    /// The sink for whatever connection is currently live, or `None` while
    /// between connect attempts.
    pub async fn sink(&self) -> Option<OutboundSink> {
        self.current_sink.read().await.clone()
    }

    /// A cloneable handle onto the currently-live sink, obtained before
    /// handing the supervisor itself to [`Supervisor::run`] (which consumes
    /// it to drive the reconnect loop as a spawned task).
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            current_sink: self.current_sink.clone(),
        }
    }

    /// Run forever, reconnecting with [`RECONNECT_DELAY`] between attempts.
    /// Intended to be spawned as its own task by the caller.
    pub async fn run(self) {
        loop {
            match tokio_tungstenite::connect_async(self.url.as_str()).await {
                Ok((stream, _response)) => {
                    let (mut write, mut read) = stream.split();
                    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
                    let sink = OutboundSink { tx: outbound_tx };

                    *self.current_sink.write().await = Some(sink.clone());
                    if let Some(hook) = &self.on_connect {
                        hook(sink.clone());
                    }

                    let write_task = tokio::spawn(async move {
                        while let Some(text) = outbound_rx.recv().await {
                            if write.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    });

                    let coordinator = self.coordinator.clone();
                    let pong_sink = sink.clone();
                    let read_task = tokio::spawn(async move {
                        while let Some(frame) = read.next().await {
                            match frame {
                                Ok(WsMessage::Text(text)) => {
                                    if let Ok(envelope) =
                                        serde_json::from_str::<OutboundEnvelope>(&text)
                                    {
                                        // §4.6 row 3: an unsolicited `ping`
                                        // push gets an immediate `PONG` reply
                                        // and never touches the coordinator.
                                        if envelope.kind.eq_ignore_ascii_case("ping") {
                                            pong_sink.send_value(&serde_json::json!({ "type": "PONG" }));
                                            continue;
                                        }
                                        coordinator.dispatch(envelope);
                                    }
                                }
                                Ok(WsMessage::Close(_)) | Err(_) => break,
                                Ok(_) => {}
                            }
                        }
                    });

                    tokio::select! {
                        _ = write_task => {},
                        _ = read_task => {},
                    }
                }
                Err(err) => {
                    tracing::debug!(error = ?err, url = %self.url, "connect attempt failed");
                }
            }

            *self.current_sink.write().await = None;
            self.coordinator.fail_all();
            if let Some(hook) = &self.on_disconnect {
                hook();
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}

/// Outlives any single `Supervisor::run` task — reads whatever sink is
/// current, reconnect after reconnect, without owning the run loop itself.
#[derive(Clone)]
pub struct ConnectionHandle {
    current_sink: Arc<RwLock<Option<OutboundSink>>>,
}

impl ConnectionHandle {
    pub async fn sink(&self) -> Option<OutboundSink> {
        self.current_sink.read().await.clone()
    }
}
