//! External collaborator interfaces (§6).
//!
//! Everything in this module is a trait: the SQL/data service, the
//! accountability/permission resolver, the schema resolver, and the query
//! sanitizer are explicitly out of scope (§1) — "the gateway consumes these;
//! it does not define them." [`memory`] supplies minimal in-memory
//! implementations used by the bundled demo binary and the integration
//! tests; nothing in the library itself depends on them.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use crate::accountability::Accountability;
use crate::protocol::{GatewayError, PrimaryKey, Query};

/// `AuthenticationService.login` / `.refresh` (§6).
#[async_trait]
pub trait AuthenticationService: Send + Sync {
    /// `login(DEFAULT_PROVIDER, { email, password }) -> { accessToken, expires }`.
    async fn login(&self, email: &str, password: &str) -> Result<IssuedToken, GatewayError>;

    /// `refresh(token) -> { accessToken }` — no explicit expiry; the server
    /// derives it from the JWT `exp` claim (§4.2).
    async fn refresh(&self, refresh_token: &str) -> Result<IssuedToken, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    /// Epoch seconds, when the issuer supplies it directly.
    pub expires_at: Option<i64>,
}

/// `resolveAccountabilityForToken` / `resolveAccountabilityForRole` (§6).
#[async_trait]
pub trait AccountabilityResolver: Send + Sync {
    async fn resolve_for_token(&self, token: &str) -> Result<Accountability, GatewayError>;

    async fn resolve_for_role(
        &self,
        role: Uuid,
        base: &Accountability,
    ) -> Result<Accountability, GatewayError>;
}

/// A deliberately minimal stand-in for Directus's `SchemaOverview` — just
/// enough to answer "does this collection exist and is it readable".
#[derive(Debug, Clone, Default)]
pub struct SchemaOverview {
    pub collections: HashSet<String>,
}

impl SchemaOverview {
    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.contains(collection)
    }
}

/// `resolveSchema({ accountability? }) -> SchemaOverview` (§6).
#[async_trait]
pub trait SchemaResolver: Send + Sync {
    async fn resolve(&self, accountability: &Accountability) -> Result<SchemaOverview, GatewayError>;
}

/// `ItemsService(collection, { schema, accountability })` read operations
/// used by the dispatcher (§4.4 step 5 and step 3 of mutation dispatch).
/// Write operations exist on the real service but are out of this gateway's
/// scope — subscriptions only ever read.
#[async_trait]
pub trait ItemsService: Send + Sync {
    async fn read_one(
        &self,
        collection: &str,
        item: &PrimaryKey,
        query: &Query,
        accountability: &Accountability,
    ) -> Result<Value, GatewayError>;

    async fn read_by_query(
        &self,
        collection: &str,
        query: &Query,
        accountability: &Accountability,
    ) -> Result<Value, GatewayError>;
}

/// `MetaService(...).getMetaForQuery(collection, query)` (§6), invoked only
/// when `query.meta` is present (§4.4 step 5).
#[async_trait]
pub trait MetaService: Send + Sync {
    async fn get_meta_for_query(
        &self,
        collection: &str,
        query: &Query,
        accountability: &Accountability,
    ) -> Result<Value, GatewayError>;
}

/// `sanitizeQuery(query, accountability) -> Query` (§6) — strips
/// privilege-escalating fields, clamps limits, resolves `$CURRENT_USER`/
/// `$NOW` placeholders. Synchronous in the real service; kept that way here.
pub trait QuerySanitizer: Send + Sync {
    fn sanitize(&self, query: Query, accountability: &Accountability) -> Query;
}
