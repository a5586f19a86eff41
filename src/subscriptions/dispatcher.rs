//! SUBSCRIBE/UNSUBSCRIBE handling and data-mutation dispatch (§4.4).

use serde_json::Value;

use super::{Subscription, SubscriptionRegistry};
use crate::accountability::Accountability;
use crate::context::Context;
use crate::events::{MutationAction, MutationEvent};
use crate::presence::{FocusRecord, PresenceTracker};
use crate::protocol::{GatewayError, InboundEnvelope, OutboundEnvelope, Query};
use crate::websocket::{ClientId, ConnectionManager};

/// Read a subscription's current result set under `accountability`: single
/// payload via `readOne` when `item` is set, else `readByQuery` plus an
/// optional `getMetaForQuery` side read (§4.4 step 5).
async fn execute_read(
    ctx: &Context,
    collection: &str,
    item: Option<&crate::protocol::PrimaryKey>,
    query: &Query,
    accountability: &Accountability,
) -> Result<(Value, Option<Value>), GatewayError> {
    if let Some(item) = item {
        let payload = ctx.items.read_one(collection, item, query, accountability).await?;
        Ok((payload, None))
    } else {
        let payload = ctx.items.read_by_query(collection, query, accountability).await?;
        let meta = if query.meta.is_some() {
            Some(ctx.meta.get_meta_for_query(collection, query, accountability).await?)
        } else {
            None
        };
        Ok((payload, meta))
    }
}

/// §4.4 "SUBSCRIBE handling". Sends either an `init` `subscription` frame
/// or a `subscribe` error frame directly to `client`; never panics on a
/// missing client (it simply has nothing to send to).
pub async fn handle_subscribe(
    env: &InboundEnvelope,
    client: ClientId,
    ctx: &Context,
    connections: &ConnectionManager,
    registry: &SubscriptionRegistry,
    presence: &PresenceTracker,
) {
    let uid = env.uid.clone();
    let Some(collection) = env.collection.clone() else {
        send_error(connections, client, GatewayError::invalid_payload("SUBSCRIBE requires a collection"), uid).await;
        return;
    };

    let Some(epoch) = connections.epoch(client).await else {
        return;
    };
    let accountability = epoch.accountability;

    let schema = match ctx.schema_resolver.resolve(&accountability).await {
        Ok(schema) => schema,
        Err(err) => {
            send_error(connections, client, err, uid).await;
            return;
        }
    };
    if !accountability.admin && !schema.has_collection(&collection) {
        send_error(connections, client, GatewayError::invalid_collection(&collection), uid).await;
        return;
    }

    let query = ctx
        .sanitizer
        .sanitize(env.query.clone().unwrap_or_default(), &accountability);
    let status = env.status.unwrap_or(false);
    let item = env.item.clone();

    match execute_read(ctx, &collection, item.as_ref(), &query, &accountability).await {
        Ok((payload, meta)) => {
            let sub = Subscription {
                client,
                collection: collection.clone(),
                item: item.clone(),
                query,
                status,
                uid: uid.clone(),
            };
            // Send `init` before the subscription becomes visible to a
            // concurrently-running dispatch: once inserted, a mutation
            // event snapshotting this bucket could race the init frame
            // through the outbound channel, violating "init always
            // precedes any mutation-driven frame" (§5, invariant #6).
            connections
                .send(client, &OutboundEnvelope::subscription(uid, "init", payload, meta))
                .await;
            registry.insert(sub).await;

            // Step 7: recording focus also applies when `item` is set.
            if let Some(item) = item {
                if let Some(user) = accountability.user {
                    presence
                        .set_focus(
                            user,
                            FocusRecord {
                                collection: collection.clone(),
                                item: Some(item),
                                field: env.field.clone(),
                            },
                        )
                        .await;
                }
                ctx.bus.publish_mutation(MutationEvent::focus(collection));
            }
        }
        Err(err) => send_error(connections, client, err, uid).await,
    }
}

/// §4.4 "UNSUBSCRIBE handling".
pub async fn handle_unsubscribe(
    env: &InboundEnvelope,
    client: ClientId,
    ctx: &Context,
    registry: &SubscriptionRegistry,
) {
    let removed = registry.remove(client, env.uid.as_deref()).await;
    for sub in removed {
        ctx.bus.publish_mutation(MutationEvent::focus(sub.collection));
    }
}

/// Cleanup path shared by connection close and connection error (§4.4,
/// §4.5): drop every subscription the client held and clear its focus
/// record. Presence's online-set transition is handled separately by the
/// caller, which must remove the connection from the manager first.
pub async fn handle_client_gone(client: ClientId, ctx: &Context, registry: &SubscriptionRegistry, presence: &PresenceTracker, user: Option<uuid::Uuid>) {
    let removed = registry.remove_client(client).await;
    for sub in removed {
        ctx.bus.publish_mutation(MutationEvent::focus(sub.collection));
    }
    if let Some(user) = user {
        presence.clear_focus(user).await;
    }
}

/// §4.4 "Data-mutation dispatch". Re-evaluates every subscription in
/// `registry[event.collection]` concurrently, under each subscriber's
/// *current* accountability (not the one captured at SUBSCRIBE time).
pub async fn dispatch_mutation(
    event: MutationEvent,
    ctx: &Context,
    connections: &ConnectionManager,
    registry: &SubscriptionRegistry,
) {
    let subs = registry.for_collection(&event.collection).await;
    if subs.is_empty() {
        return;
    }

    let tasks = subs.into_iter().map(|sub| {
        let event = event.clone();
        async move {
            dispatch_one(&event, sub, ctx, connections).await;
        }
    });
    futures::future::join_all(tasks).await;
}

fn skip_synthetic(event: &MutationEvent, sub: &Subscription) -> bool {
    match event.action {
        MutationAction::Focus => !sub.status,
        MutationAction::Status => {
            !(event.collection == "directus_users" && sub.status && sub.item.is_none())
        }
        _ => false,
    }
}

async fn dispatch_one(event: &MutationEvent, sub: Subscription, ctx: &Context, connections: &ConnectionManager) {
    if skip_synthetic(event, &sub) {
        return;
    }

    let Some(epoch) = connections.epoch(sub.client).await else {
        // Client gone; a stale bucket entry will be cleaned up by its own
        // close handler. Dispatch must never resurrect it here.
        return;
    };
    let accountability = epoch.accountability;

    // §4.4 step "b": re-resolve schema under the subscriber's *current*
    // accountability — roles/permissions may have changed since SUBSCRIBE.
    match ctx.schema_resolver.resolve(&accountability).await {
        Ok(schema) if accountability.admin || schema.has_collection(&sub.collection) => {}
        Ok(_) => {
            send_error(connections, sub.client, GatewayError::forbidden("Collection no longer accessible"), sub.uid.clone()).await;
            return;
        }
        Err(err) => {
            send_error(connections, sub.client, err, sub.uid.clone()).await;
            return;
        }
    }

    match execute_read(ctx, &sub.collection, sub.item.as_ref(), &sub.query, &accountability).await {
        Ok((payload, meta)) => {
            connections
                .send(
                    sub.client,
                    &OutboundEnvelope::subscription(sub.uid.clone(), &event.action.to_string(), payload, meta),
                )
                .await;
        }
        Err(err) => {
            // §4.4 step "d": a permission failure on re-read is reported but
            // never tears down the subscription.
            send_error(connections, sub.client, err, sub.uid.clone()).await;
        }
    }
}

async fn send_error(connections: &ConnectionManager, client: ClientId, err: GatewayError, uid: Option<String>) {
    connections.send(client, &err.into_envelope(Some("subscribe"), uid)).await;
}

/// The dispatcher pool (§2 "Event Bus", §5 concurrency model): drains the
/// mutation broadcast channel and fans each event out via
/// [`dispatch_mutation`]. Events are processed one at a time — fan-out to
/// every subscription *within* one event still runs concurrently (see
/// [`dispatch_mutation`]) — so that per-collection frame ordering (§5: "...
/// preserve the server-side event order within a single collection") holds
/// without needing a per-collection queue. Intended to be `tokio::spawn`ed
/// once, for the lifetime of the process, alongside the HTTP listener.
pub async fn run_dispatch_loop(ctx: Context, connections: ConnectionManager, registry: SubscriptionRegistry) {
    let mut mutations = ctx.bus.subscribe_mutations();
    loop {
        match mutations.recv().await {
            Ok(event) => dispatch_mutation(event, &ctx, &connections, &registry).await,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "dispatcher lagged behind the mutation bus; some events were dropped");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accountability::AuthEpoch;
    use crate::events::EventBus;
    use crate::protocol::PrimaryKey;
    use crate::services::memory::{
        InMemoryAccountabilityResolver, InMemoryAuthenticationService, MemoryItemsService, MemoryMetaService,
        PassthroughSanitizer, StaticSchemaResolver,
    };
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn make_context(items: Arc<MemoryItemsService>) -> Context {
        let mut collections = HashSet::new();
        collections.insert("articles".to_string());
        Context {
            bus: EventBus::new(),
            auth_service: Arc::new(InMemoryAuthenticationService {
                users: Default::default(),
                jwt_secret: "s".to_string(),
                access_ttl_seconds: 900,
            }),
            accountability_resolver: Arc::new(InMemoryAccountabilityResolver {
                jwt_secret: "s".to_string(),
                admins: HashSet::new(),
            }),
            schema_resolver: Arc::new(StaticSchemaResolver { collections }),
            items,
            meta: Arc::new(MemoryMetaService),
            sanitizer: Arc::new(PassthroughSanitizer),
        }
    }

    async fn connected_client(connections: &ConnectionManager, user: Uuid) -> (ClientId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let (close_tx, _close_rx) = mpsc::channel(1);
        let epoch = AuthEpoch {
            accountability: Accountability {
                user: Some(user),
                ..Accountability::public()
            },
            expires_at: None,
        };
        let id = connections.register(tx, close_tx, epoch).await;
        (id, rx)
    }

    #[tokio::test]
    async fn subscribe_sends_init_frame_and_registers() {
        let items = Arc::new(MemoryItemsService::new());
        items.insert("articles", serde_json::json!({ "id": 1, "title": "Hello" }));
        let ctx = make_context(items);
        let connections = ConnectionManager::new();
        let registry = SubscriptionRegistry::new();
        let presence = PresenceTracker::new();

        let (client, mut rx) = connected_client(&connections, Uuid::new_v4()).await;
        let env = InboundEnvelope::parse(
            r#"{"type":"SUBSCRIBE","uid":"a1","collection":"articles","query":{"limit":10}}"#,
        )
        .unwrap();

        handle_subscribe(&env, client, &ctx, &connections, &registry, &presence).await;

        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("\"event\":\"init\""));
        assert_eq!(registry.len_for("articles").await, 1);
    }

    #[tokio::test]
    async fn subscribe_on_unknown_collection_is_rejected() {
        let ctx = make_context(Arc::new(MemoryItemsService::new()));
        let connections = ConnectionManager::new();
        let registry = SubscriptionRegistry::new();
        let presence = PresenceTracker::new();

        let (client, mut rx) = connected_client(&connections, Uuid::new_v4()).await;
        let env = InboundEnvelope::parse(r#"{"type":"SUBSCRIBE","uid":"a1","collection":"ghosts"}"#).unwrap();

        handle_subscribe(&env, client, &ctx, &connections, &registry, &presence).await;

        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("INVALID_COLLECTION"));
        assert_eq!(registry.len_for("ghosts").await, 0);
    }

    #[tokio::test]
    async fn mutation_dispatch_sends_follow_up_frame() {
        let items = Arc::new(MemoryItemsService::new());
        let ctx = make_context(items.clone());
        let connections = ConnectionManager::new();
        let registry = SubscriptionRegistry::new();
        let presence = PresenceTracker::new();

        let (client, mut rx) = connected_client(&connections, Uuid::new_v4()).await;
        let env = InboundEnvelope::parse(r#"{"type":"SUBSCRIBE","uid":"a1","collection":"articles"}"#).unwrap();
        handle_subscribe(&env, client, &ctx, &connections, &registry, &presence).await;
        rx.recv().await.unwrap(); // drain init

        items.insert("articles", serde_json::json!({ "id": 1, "title": "New" }));
        dispatch_mutation(
            MutationEvent::create("articles", PrimaryKey::Integer(1), Value::Null),
            &ctx,
            &connections,
            &registry,
        )
        .await;

        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("\"event\":\"create\""));
        assert!(msg.contains("\"New\""));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let ctx = make_context(Arc::new(MemoryItemsService::new()));
        let registry = SubscriptionRegistry::new();
        let client = ClientId::test();
        let env = InboundEnvelope::parse(r#"{"type":"UNSUBSCRIBE","uid":"a1"}"#).unwrap();

        handle_unsubscribe(&env, client, &ctx, &registry).await;
        handle_unsubscribe(&env, client, &ctx, &registry).await;
    }
}
