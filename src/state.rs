use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::presence::PresenceTracker;
use crate::subscriptions::SubscriptionRegistry;
use crate::websocket::ConnectionManager;

/// Shared application state passed to every axum handler. Cheaply
/// cloneable — each field is itself an `Arc` or internally `Arc`-backed.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub context: Context,
    pub connections: ConnectionManager,
    pub registry: SubscriptionRegistry,
    pub presence: PresenceTracker,
}

impl GatewayState {
    pub fn new(config: Config, context: Context) -> Self {
        Self {
            config: Arc::new(config),
            context,
            connections: ConnectionManager::new(),
            registry: SubscriptionRegistry::new(),
            presence: PresenceTracker::new(),
        }
    }
}
