//! Connection Manager per-connection read loop (§4.3) plus the handshake
//! admission phase for `AuthMode::Handshake` (§4.1).

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::accountability::AuthEpoch;
use crate::auth;
use crate::config::AuthMode;
use crate::events::LifecycleEvent;
use crate::protocol::{GatewayError, InboundEnvelope, OutboundEnvelope};
use crate::state::GatewayState;
use crate::subscriptions::dispatcher;
use crate::websocket::ClientId;

const OUTBOUND_CAPACITY: usize = 256;

/// Drive one accepted socket end-to-end: (optionally) the handshake
/// admission phase, then the steady-state read loop, then teardown.
/// `initial_epoch` is already resolved for `strict` mode, empty for
/// `public`, and empty-pending-handshake for `handshake`.
pub async fn run_connection(socket: WebSocket, initial_epoch: AuthEpoch, state: GatewayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let (close_tx, mut close_rx) = mpsc::channel::<()>(1);

    let client = state
        .connections
        .register(outbound_tx, close_tx, AuthEpoch::empty())
        .await;

    state
        .connections
        .apply_epoch(
            client,
            initial_epoch.clone(),
            state.config.websockets_rest_auth,
            state.config.websockets_rest_auth_timeout,
        )
        .await;

    if let Some(user) = initial_epoch.accountability.user {
        state.presence.mark_online(user, &state.context.bus).await;
        state
            .context
            .bus
            .publish_lifecycle(LifecycleEvent::Connect { client_id: client, user: Some(user) });
    } else {
        state
            .context
            .bus
            .publish_lifecycle(LifecycleEvent::Connect { client_id: client, user: None });
    }

    // The outbound drain task is spawned *before* the handshake phase so
    // that an error frame queued by a rejected handshake (timeout,
    // non-AUTH first frame, auth failure) actually reaches the socket
    // instead of being dropped with `outbound_rx` on an early return —
    // §4.1 requires both "send error frame and close socket".
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // §4.1 handshake mode: the socket is admitted unconditionally, but the
    // very first frame must be an AUTH within `timeout`, and failure here
    // (unlike a later inline re-AUTH, §4.2) closes the socket.
    if state.config.websockets_rest_auth == AuthMode::Handshake && initial_epoch.is_empty() {
        let admitted = handshake_first_frame(&mut ws_receiver, client, &state).await;
        if !admitted {
            // Dropping the client here drops its outbound sender, which
            // lets `send_task` flush the already-queued rejection frame
            // before its channel closes and the loop exits on its own.
            teardown(client, &state).await;
            return;
        }
    }

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    handle_message(client, &text, &recv_state).await;
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client = %client, error = ?e, "websocket receive error; closing");
                    break;
                }
                None => break,
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        _ = close_rx.recv() => {
            send_task.abort();
            recv_task.abort();
        }
    }

    teardown(client, &state).await;
}

async fn handshake_first_frame(
    ws_receiver: &mut (impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin),
    client: ClientId,
    state: &GatewayState,
) -> bool {
    let timeout = state.config.websockets_rest_auth_timeout;
    let frame = tokio::time::timeout(timeout, ws_receiver.next()).await;

    let text = match frame {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            state
                .connections
                .send(client, &GatewayError::authentication_failed("Handshake timed out").into_envelope(None, None))
                .await;
            return false;
        }
    };

    let Ok(env) = InboundEnvelope::parse(&text) else {
        state
            .connections
            .send(client, &GatewayError::invalid_payload("Malformed first frame").into_envelope(None, None))
            .await;
        return false;
    };

    if env.kind != "AUTH" {
        state
            .connections
            .send(
                client,
                &GatewayError::authentication_failed("First frame must be AUTH").into_envelope(None, None),
            )
            .await;
        return false;
    }

    match auth::authenticate(&env, &state.context).await {
        Ok(epoch) => {
            let user = epoch.accountability.user;
            state
                .connections
                .apply_epoch(client, epoch, state.config.websockets_rest_auth, state.config.websockets_rest_auth_timeout)
                .await;
            if let Some(user) = user {
                state.presence.mark_online(user, &state.context.bus).await;
            }
            state.connections.send(client, &OutboundEnvelope::auth_ok(env.uid.clone())).await;
            true
        }
        Err(err) => {
            state.connections.send(client, &err.into_envelope(Some("auth"), env.uid.clone())).await;
            false
        }
    }
}

/// §4.3 `message` handler: uppercase `type`, route by it. Parse failures
/// and routing failures are reported but never close the connection — only
/// transport errors and the handshake's first-frame check do that.
async fn handle_message(client: ClientId, text: &str, state: &GatewayState) {
    let env = match InboundEnvelope::parse(text) {
        Ok(env) => env,
        Err(_) => {
            state
                .connections
                .send(client, &GatewayError::invalid_payload("Malformed JSON frame").into_envelope(None, None))
                .await;
            return;
        }
    };

    match env.kind.as_str() {
        "AUTH" => handle_auth(&env, client, state).await,
        "SUBSCRIBE" => {
            dispatcher::handle_subscribe(&env, client, &state.context, &state.connections, &state.registry, &state.presence)
                .await
        }
        "UNSUBSCRIBE" => dispatcher::handle_unsubscribe(&env, client, &state.context, &state.registry).await,
        "FOCUS" => handle_focus(&env, client, state).await,
        "ITEMS" => handle_items(&env, client, state).await,
        "PONG" => {}
        _ => {
            state
                .connections
                .send(client, &GatewayError::invalid_payload(format!("Unknown message type \"{}\"", env.kind)).into_envelope(None, env.uid.clone()))
                .await;
        }
    }
}

/// §4.2: a successful inline AUTH replaces the epoch wholesale and restarts
/// the expiry timer; failure clears it to `{null, null}` without closing.
async fn handle_auth(env: &InboundEnvelope, client: ClientId, state: &GatewayState) {
    match auth::authenticate(env, &state.context).await {
        Ok(epoch) => {
            let user = epoch.accountability.user;
            state
                .connections
                .apply_epoch(client, epoch, state.config.websockets_rest_auth, state.config.websockets_rest_auth_timeout)
                .await;
            if let Some(user) = user {
                state.presence.mark_online(user, &state.context.bus).await;
            }
            state.connections.send(client, &OutboundEnvelope::auth_ok(env.uid.clone())).await;
        }
        Err(err) => {
            state
                .connections
                .apply_epoch(client, AuthEpoch::empty(), state.config.websockets_rest_auth, state.config.websockets_rest_auth_timeout)
                .await;
            state.connections.send(client, &err.into_envelope(Some("auth"), env.uid.clone())).await;
        }
    }
}

async fn handle_focus(env: &InboundEnvelope, client: ClientId, state: &GatewayState) {
    let Some(user) = state.connections.accountability_user(client).await else {
        return;
    };
    let Some(collection) = env.collection.clone() else {
        return;
    };
    state
        .presence
        .set_focus(
            user,
            crate::presence::FocusRecord {
                collection: collection.clone(),
                item: env.item.clone(),
                field: env.field.clone(),
            },
        )
        .await;
    state.context.bus.publish_mutation(crate::events::MutationEvent::focus(collection));
}

/// A one-off read outside the subscription mechanism (`ITEMS`, §6 wire
/// protocol table). No registry entry is created; the reply carries the
/// same `uid` so the client's request/response coordinator (§4.6) can match
/// it like any other request.
async fn handle_items(env: &InboundEnvelope, client: ClientId, state: &GatewayState) {
    let Some(collection) = env.collection.clone() else {
        state
            .connections
            .send(client, &GatewayError::invalid_payload("ITEMS requires a collection").into_envelope(Some("items"), env.uid.clone()))
            .await;
        return;
    };
    let Some(epoch) = state.connections.epoch(client).await else {
        return;
    };
    let accountability = epoch.accountability;
    let query = state
        .context
        .sanitizer
        .sanitize(env.query.clone().unwrap_or_default(), &accountability);

    let result = if let Some(item) = &env.item {
        state.context.items.read_one(&collection, item, &query, &accountability).await
    } else {
        state.context.items.read_by_query(&collection, &query, &accountability).await
    };

    match result {
        Ok(payload) => {
            state
                .connections
                .send(
                    client,
                    &OutboundEnvelope {
                        kind: "items".to_string(),
                        uid: env.uid.clone(),
                        payload: Some(payload),
                        ..Default::default()
                    },
                )
                .await;
        }
        Err(err) => {
            state
                .connections
                .send(client, &err.into_envelope(Some("items"), env.uid.clone()))
                .await;
        }
    }
}

async fn teardown(client: ClientId, state: &GatewayState) {
    let user = state.connections.accountability_user(client).await;
    state.connections.remove(client).await;
    dispatcher::handle_client_gone(client, &state.context, &state.registry, &state.presence, user).await;
    if let Some(user) = user {
        state.presence.mark_offline_if_last(user, &state.connections, &state.context.bus).await;
    }
    state
        .context
        .bus
        .publish_lifecycle(LifecycleEvent::Close { client_id: client, user });
}
