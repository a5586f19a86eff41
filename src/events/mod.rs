//! Internal publish/subscribe surface (§4's "Event Bus", generalized per the
//! design notes in §9: one typed channel per lifecycle kind, one tagged
//! union for data mutations, instead of a string-keyed emitter).

use serde_json::Value;
use strum::Display;
use tokio::sync::broadcast;

use crate::protocol::PrimaryKey;
use crate::websocket::ClientId;

/// The fourteen modules the gateway subscribes to mutation events from
/// (§6). `items` mutations carry the *actual* collection name; the other
/// thirteen are Directus system collections and bucket under
/// `directus_<module>` (see [`system_collection_name`]).
pub const MUTATION_MODULES: &[&str] = &[
    "items",
    "activity",
    "collections",
    "fields",
    "files",
    "folders",
    "permissions",
    "presets",
    "relations",
    "revisions",
    "roles",
    "settings",
    "users",
    "webhooks",
];

/// `directus_<module>`, e.g. `system_collection_name("users") ==
/// "directus_users"`. `items` itself has no system collection — its mutation
/// events already carry the real collection name.
pub fn system_collection_name(module: &str) -> String {
    format!("directus_{module}")
}

/// The real CRUD triplet, plus two synthetic actions the dispatcher fans out
/// for presence/focus changes (§4.4 "Synthetic events"). Synthetic actions
/// never originate from the data service — only from [`crate::presence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
    /// A user's declared editing locus changed (§4.5).
    Focus,
    /// A user's online/offline status changed (§4.5).
    Status,
}

/// `<collection>.create|update|delete` from §4.4, generalized to also carry
/// the two synthetic actions above so the dispatcher has one fan-out path
/// for both real and synthetic events.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub collection: String,
    pub action: MutationAction,
    pub key: Option<PrimaryKey>,
    pub keys: Option<Vec<PrimaryKey>>,
    /// Never relayed to subscribers directly (§4.4 step "c" rationale: row
    /// level permissions may exclude the row from a given subscriber) — kept
    /// here only for diagnostics/logging.
    pub payload: Option<Value>,
}

impl MutationEvent {
    pub fn create(collection: impl Into<String>, key: PrimaryKey, payload: Value) -> Self {
        Self {
            collection: collection.into(),
            action: MutationAction::Create,
            key: Some(key),
            keys: None,
            payload: Some(payload),
        }
    }

    pub fn update(collection: impl Into<String>, keys: Vec<PrimaryKey>, payload: Value) -> Self {
        Self {
            collection: collection.into(),
            action: MutationAction::Update,
            key: None,
            keys: Some(keys),
            payload: Some(payload),
        }
    }

    pub fn delete(collection: impl Into<String>, keys: Vec<PrimaryKey>) -> Self {
        Self {
            collection: collection.into(),
            action: MutationAction::Delete,
            key: None,
            keys: Some(keys),
            payload: None,
        }
    }

    pub fn focus(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            action: MutationAction::Focus,
            key: None,
            keys: None,
            payload: None,
        }
    }

    pub fn status(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            action: MutationAction::Status,
            key: None,
            keys: None,
            payload: None,
        }
    }
}

/// Connection lifecycle events (`websocket.connect/close/error`, §2), kept
/// on their own channel separate from data mutations so the presence
/// tracker doesn't have to filter a shared stream.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Connect { client_id: ClientId, user: Option<uuid::Uuid> },
    AuthSuccess { client_id: ClientId, user: Option<uuid::Uuid> },
    AuthFailure { client_id: ClientId },
    Close { client_id: ClientId, user: Option<uuid::Uuid> },
    Error { client_id: ClientId, user: Option<uuid::Uuid> },
}

/// The process-wide bus. Cheaply cloneable — every clone shares the same
/// underlying broadcast channels.
#[derive(Clone)]
pub struct EventBus {
    mutations: broadcast::Sender<MutationEvent>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        // Capacity bounds how far a slow subscriber can lag before it starts
        // missing events (it'll see `RecvError::Lagged`, never a deadlock —
        // this gateway makes no delivery guarantees past a reconnect, per
        // the Non-goals in §1).
        let (mutations, _) = broadcast::channel(1024);
        let (lifecycle, _) = broadcast::channel(1024);
        Self {
            mutations,
            lifecycle,
        }
    }

    pub fn publish_mutation(&self, event: MutationEvent) {
        // No receivers is the common case in unit tests; not an error.
        let _ = self.mutations.send(event);
    }

    pub fn subscribe_mutations(&self) -> broadcast::Receiver<MutationEvent> {
        self.mutations.subscribe()
    }

    pub fn publish_lifecycle(&self, event: LifecycleEvent) {
        let _ = self.lifecycle.send(event);
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_modules_table_has_fourteen_entries() {
        assert_eq!(MUTATION_MODULES.len(), 14);
        assert!(MUTATION_MODULES.contains(&"items"));
        assert!(MUTATION_MODULES.contains(&"users"));
    }

    #[test]
    fn system_collection_name_prefixes_directus() {
        assert_eq!(system_collection_name("users"), "directus_users");
    }

    #[tokio::test]
    async fn mutation_published_is_received() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_mutations();
        bus.publish_mutation(MutationEvent::create(
            "articles",
            PrimaryKey::Integer(1),
            Value::Null,
        ));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.collection, "articles");
        assert_eq!(event.action, MutationAction::Create);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish_mutation(MutationEvent::delete("articles", vec![PrimaryKey::Integer(1)]));
    }
}
