//! Dependency-injected context (§9 "Global singletons → dependency-injected
//! context"): everything the gateway needs from the outside world, bundled
//! once at construction instead of reached for as a process global.

use std::sync::Arc;

use crate::events::EventBus;
use crate::services::{AccountabilityResolver, AuthenticationService, ItemsService, MetaService, QuerySanitizer, SchemaResolver};

/// Cheaply cloneable — every field is an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct Context {
    pub bus: EventBus,
    pub auth_service: Arc<dyn AuthenticationService>,
    pub accountability_resolver: Arc<dyn AccountabilityResolver>,
    pub schema_resolver: Arc<dyn SchemaResolver>,
    pub items: Arc<dyn ItemsService>,
    pub meta: Arc<dyn MetaService>,
    pub sanitizer: Arc<dyn QuerySanitizer>,
}
