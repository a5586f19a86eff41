//! Subscription Registry (§4.4): indexes subscriptions by collection.
//! Dispatch logic lives in [`dispatcher`].

pub mod dispatcher;

pub use dispatcher::run_dispatch_loop;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::protocol::{PrimaryKey, Query};
use crate::websocket::ClientId;

/// §3 "Subscription". `client` is a non-owning [`ClientId`] per §9 — the
/// registry never holds a socket or sender directly.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub client: ClientId,
    pub collection: String,
    pub item: Option<PrimaryKey>,
    pub query: Query,
    pub status: bool,
    pub uid: Option<String>,
}

/// `mapping collection → set of Subscription` (§4.4). Modeled as a `Vec`
/// per bucket rather than a true set: subscriptions don't implement `Hash`
/// (a `Query` embeds arbitrary JSON), and bucket sizes are expected to stay
/// small enough that linear scan-on-dispatch is the documented cost (§4.4:
/// "lookup on event dispatch is O(1) to the bucket, then linear over the
/// bucket").
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    buckets: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `sub`, first removing any prior subscription owned by the
    /// same client with the same `uid` (§3: "a new SUBSCRIBE with an
    /// existing `uid` replaces the prior subscription").
    pub async fn insert(&self, sub: Subscription) {
        let mut buckets = self.buckets.write().await;
        if sub.uid.is_some() {
            for bucket in buckets.values_mut() {
                bucket.retain(|existing| !(existing.client == sub.client && existing.uid == sub.uid));
            }
        }
        buckets.entry(sub.collection.clone()).or_default().push(sub);
    }

    /// §4.4 UNSUBSCRIBE handling. If `uid` is given, removes the one
    /// matching subscription owned by `client` on any collection; else
    /// removes all of `client`'s subscriptions. Returns the removed
    /// subscriptions so the caller can fan out the synthetic `focus` event
    /// per collection.
    pub async fn remove(&self, client: ClientId, uid: Option<&str>) -> Vec<Subscription> {
        let mut removed = Vec::new();
        let mut buckets = self.buckets.write().await;
        for bucket in buckets.values_mut() {
            let (keep, drop): (Vec<_>, Vec<_>) = bucket.drain(..).partition(|sub| {
                !(sub.client == client && uid.map(|u| sub.uid.as_deref() == Some(u)).unwrap_or(true))
            });
            *bucket = keep;
            removed.extend(drop);
        }
        buckets.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    /// Removes every subscription owned by `client` (connection close/error,
    /// §4.4). Equivalent to `remove(client, None)`, named separately for
    /// call-site clarity at teardown.
    pub async fn remove_client(&self, client: ClientId) -> Vec<Subscription> {
        self.remove(client, None).await
    }

    pub async fn for_collection(&self, collection: &str) -> Vec<Subscription> {
        self.buckets
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub async fn len_for(&self, collection: &str) -> usize {
        self.for_collection(collection).await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(client: ClientId, collection: &str, uid: Option<&str>) -> Subscription {
        Subscription {
            client,
            collection: collection.to_string(),
            item: None,
            query: Query::default(),
            status: false,
            uid: uid.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn insert_and_lookup_by_collection() {
        let registry = SubscriptionRegistry::new();
        let client = ClientId::test();
        registry.insert(sub(client, "articles", Some("a1"))).await;
        assert_eq!(registry.len_for("articles").await, 1);
    }

    #[tokio::test]
    async fn resubscribe_with_same_uid_replaces() {
        let registry = SubscriptionRegistry::new();
        let client = ClientId::test();
        registry.insert(sub(client, "articles", Some("a1"))).await;
        registry.insert(sub(client, "articles", Some("a1"))).await;
        assert_eq!(registry.len_for("articles").await, 1);
    }

    #[tokio::test]
    async fn unsubscribe_by_uid_removes_only_that_one() {
        let registry = SubscriptionRegistry::new();
        let client = ClientId::test();
        registry.insert(sub(client, "articles", Some("a1"))).await;
        registry.insert(sub(client, "articles", Some("a2"))).await;
        let removed = registry.remove(client, Some("a1")).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(registry.len_for("articles").await, 1);
    }

    #[tokio::test]
    async fn unsubscribe_without_uid_removes_all_for_client() {
        let registry = SubscriptionRegistry::new();
        let client = ClientId::test();
        registry.insert(sub(client, "articles", Some("a1"))).await;
        registry.insert(sub(client, "people", Some("a2"))).await;
        let removed = registry.remove(client, None).await;
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len_for("articles").await, 0);
        assert_eq!(registry.len_for("people").await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_twice_is_a_noop() {
        let registry = SubscriptionRegistry::new();
        let client = ClientId::test();
        registry.insert(sub(client, "articles", Some("a1"))).await;
        registry.remove(client, Some("a1")).await;
        let second = registry.remove(client, Some("a1")).await;
        assert!(second.is_empty());
    }
}
