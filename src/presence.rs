//! Presence & Focus Tracker (§4.5).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::events::{EventBus, MutationEvent};
use crate::protocol::PrimaryKey;
use crate::websocket::ConnectionManager;

/// `userFocus` value (§3 "Focus map"): `{ collection, item?, field? }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocusRecord {
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<PrimaryKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// `onlineStatus` (a set of user ids) plus `userFocus` (one record per
/// user, last-writer-wins). Membership is user-keyed, not connection-keyed
/// — "a user with two tabs appears once" (§3).
#[derive(Clone)]
pub struct PresenceTracker {
    online: Arc<RwLock<HashSet<Uuid>>>,
    focus: Arc<RwLock<HashMap<Uuid, FocusRecord>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            online: Arc::new(RwLock::new(HashSet::new())),
            focus: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn is_online(&self, user: Uuid) -> bool {
        self.online.read().await.contains(&user)
    }

    /// A user enters `onlineStatus` on `websocket.connect` and on
    /// `websocket.auth.success` (§3). Dispatches a synthetic `status` event
    /// only on the 0→1 transition — re-entering while already online (a
    /// second tab) is not itself newsworthy.
    pub async fn mark_online(&self, user: Uuid, bus: &EventBus) {
        let newly_online = self.online.write().await.insert(user);
        if newly_online {
            bus.publish_mutation(MutationEvent::status("directus_users"));
        }
    }

    /// A user exits `onlineStatus` on `websocket.close`, `websocket.error`,
    /// and `websocket.auth.failure`, but — per §4.5's set-based (not
    /// reference-counted) arithmetic and invariant #3 — only once no other
    /// live connection still carries that user's identity. `connections`
    /// must already reflect the closing connection's removal when this is
    /// called, so the scan below sees the post-close world.
    pub async fn mark_offline_if_last(&self, user: Uuid, connections: &ConnectionManager, bus: &EventBus) {
        if connections.any_client_for_user(user).await {
            return;
        }
        let removed = self.online.write().await.remove(&user);
        if removed {
            bus.publish_mutation(MutationEvent::status("directus_users"));
        }
    }

    /// Overwrites any existing focus record for `user` (§4.5: "`addFocus`
    /// overwrites"). Called from SUBSCRIBE with `item` present, or an
    /// explicit `FOCUS` message.
    pub async fn set_focus(&self, user: Uuid, record: FocusRecord) {
        self.focus.write().await.insert(user, record);
    }

    pub async fn get_focus(&self, user: Uuid) -> Option<FocusRecord> {
        self.focus.read().await.get(&user).cloned()
    }

    /// Removed on disconnect (§4.5). Returns the removed record, if any, so
    /// the caller can decide whether a trailing synthetic dispatch is
    /// warranted.
    pub async fn clear_focus(&self, user: Uuid) -> Option<FocusRecord> {
        self.focus.write().await.remove(&user)
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
