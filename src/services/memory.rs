//! In-memory stand-ins for every external collaborator trait in
//! [`super`] (§6). This is demo/test scaffolding, not a production data
//! layer — it is wired up only behind the bundled demo binary and the
//! integration tests; nothing in the gateway's core logic depends on it.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{
    AccountabilityResolver, AuthenticationService, IssuedToken, ItemsService, MetaService,
    QuerySanitizer, SchemaOverview, SchemaResolver,
};
use crate::accountability::Accountability;
use crate::auth::jwt;
use crate::protocol::{GatewayError, PrimaryKey, Query};

fn item_id(item: &Value) -> Option<PrimaryKey> {
    item.get("id").and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn project_fields(item: &Value, query: &Query) -> Value {
    match &query.fields {
        Some(fields) if !fields.is_empty() && !fields.iter().any(|f| f == "*") => {
            let mut projected = serde_json::Map::new();
            if let Value::Object(map) = item {
                for field in fields {
                    if let Some(value) = map.get(field) {
                        projected.insert(field.clone(), value.clone());
                    }
                }
            }
            Value::Object(projected)
        }
        _ => item.clone(),
    }
}

/// A plain collection→rows store. `insert`/`update`/`delete` are inherent
/// methods (not part of [`ItemsService`]) for test/demo setup — the trait
/// itself is read-only, matching the gateway's own read-only use of it.
#[derive(Default)]
pub struct MemoryItemsService {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryItemsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, item: Value) {
        self.collections
            .write()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(item);
    }

    pub fn update(&self, collection: &str, id: &PrimaryKey, patch: Value) {
        let mut guard = self.collections.write().unwrap();
        let Some(items) = guard.get_mut(collection) else {
            return;
        };
        let Some(existing) = items.iter_mut().find(|item| item_id(item).as_ref() == Some(id)) else {
            return;
        };
        if let (Value::Object(existing_map), Value::Object(patch_map)) = (existing, patch) {
            existing_map.extend(patch_map);
        }
    }

    pub fn delete(&self, collection: &str, id: &PrimaryKey) {
        let mut guard = self.collections.write().unwrap();
        if let Some(items) = guard.get_mut(collection) {
            items.retain(|item| item_id(item).as_ref() != Some(id));
        }
    }
}

#[async_trait]
impl ItemsService for MemoryItemsService {
    async fn read_one(
        &self,
        collection: &str,
        item: &PrimaryKey,
        query: &Query,
        _accountability: &Accountability,
    ) -> Result<Value, GatewayError> {
        let guard = self.collections.read().unwrap();
        let found = guard
            .get(collection)
            .and_then(|items| items.iter().find(|candidate| item_id(candidate).as_ref() == Some(item)));
        Ok(found.map(|v| project_fields(v, query)).unwrap_or(Value::Null))
    }

    async fn read_by_query(
        &self,
        collection: &str,
        query: &Query,
        _accountability: &Accountability,
    ) -> Result<Value, GatewayError> {
        let guard = self.collections.read().unwrap();
        let mut items: Vec<Value> = guard.get(collection).cloned().unwrap_or_default();
        if let Some(offset) = query.offset {
            items = items.into_iter().skip(offset.max(0) as usize).collect();
        }
        if let Some(limit) = query.limit {
            items.truncate(limit.max(0) as usize);
        }
        let projected: Vec<Value> = items.iter().map(|item| project_fields(item, query)).collect();
        Ok(Value::Array(projected))
    }
}

pub struct MemoryMetaService;

#[async_trait]
impl MetaService for MemoryMetaService {
    async fn get_meta_for_query(
        &self,
        collection: &str,
        _query: &Query,
        _accountability: &Accountability,
    ) -> Result<Value, GatewayError> {
        Ok(json!({ "collection": collection, "filter_count": 0, "total_count": 0 }))
    }
}

/// Every named collection is readable by everyone; good enough for demos
/// and tests, where real permission evaluation is out of scope (§1).
pub struct StaticSchemaResolver {
    pub collections: HashSet<String>,
}

#[async_trait]
impl SchemaResolver for StaticSchemaResolver {
    async fn resolve(&self, _accountability: &Accountability) -> Result<SchemaOverview, GatewayError> {
        Ok(SchemaOverview {
            collections: self.collections.clone(),
        })
    }
}

pub struct PassthroughSanitizer;

impl QuerySanitizer for PassthroughSanitizer {
    fn sanitize(&self, query: Query, _accountability: &Accountability) -> Query {
        query
    }
}

/// Verifies tokens signed by [`InMemoryAuthenticationService`] against the
/// same shared secret, and maps the subject to a fixed admin allow-list.
pub struct InMemoryAccountabilityResolver {
    pub jwt_secret: String,
    pub admins: HashSet<Uuid>,
}

#[async_trait]
impl AccountabilityResolver for InMemoryAccountabilityResolver {
    async fn resolve_for_token(&self, token: &str) -> Result<Accountability, GatewayError> {
        let user = jwt::decode_verified(token, &self.jwt_secret)
            .map_err(|_| GatewayError::authentication_failed("Invalid or expired token"))?;
        Ok(Accountability {
            user: Some(user),
            role: None,
            admin: self.admins.contains(&user),
            ..Accountability::public()
        })
    }

    async fn resolve_for_role(&self, role: Uuid, base: &Accountability) -> Result<Accountability, GatewayError> {
        Ok(Accountability {
            role: Some(role),
            ..base.clone()
        })
    }
}

/// Issues short-lived access tokens for a fixed email/password table.
/// `refresh` trusts any syntactically valid token it itself issued — there
/// is no separate long-lived refresh-token store in this demo.
pub struct InMemoryAuthenticationService {
    pub users: HashMap<String, (String, Uuid)>,
    pub jwt_secret: String,
    pub access_ttl_seconds: i64,
}

impl InMemoryAuthenticationService {
    fn issue(&self, user_id: Uuid) -> Result<IssuedToken, GatewayError> {
        let expires_at = chrono::Utc::now().timestamp() + self.access_ttl_seconds;
        let access_token =
            jwt::encode_hs256(user_id, expires_at, &self.jwt_secret).map_err(|_| GatewayError::internal())?;
        Ok(IssuedToken {
            access_token,
            expires_at: Some(expires_at),
        })
    }
}

#[async_trait]
impl AuthenticationService for InMemoryAuthenticationService {
    async fn login(&self, email: &str, password: &str) -> Result<IssuedToken, GatewayError> {
        let (expected_password, user_id) = self
            .users
            .get(email)
            .ok_or_else(|| GatewayError::authentication_failed("Invalid credentials"))?;
        if expected_password != password {
            return Err(GatewayError::authentication_failed("Invalid credentials"));
        }
        self.issue(*user_id)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<IssuedToken, GatewayError> {
        // Signature verification here, with no expiry check, models "a
        // refresh token lives longer than the access tokens it mints" —
        // real expiry enforcement for refresh tokens lives entirely in the
        // external auth service (§6).
        let user_id = jwt::decode_verified(refresh_token, &self.jwt_secret)
            .map_err(|_| GatewayError::authentication_failed("Invalid refresh token"))?;
        self.issue(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Query;

    fn query() -> Query {
        Query::default()
    }

    #[tokio::test]
    async fn read_one_finds_inserted_item() {
        let items = MemoryItemsService::new();
        items.insert("articles", json!({ "id": 1, "title": "Hello" }));
        let result = items
            .read_one(
                "articles",
                &PrimaryKey::Integer(1),
                &query(),
                &Accountability::public(),
            )
            .await
            .unwrap();
        assert_eq!(result["title"], "Hello");
    }

    #[tokio::test]
    async fn read_one_missing_item_is_null() {
        let items = MemoryItemsService::new();
        let result = items
            .read_one("articles", &PrimaryKey::Integer(99), &query(), &Accountability::public())
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn read_by_query_reflects_update_and_delete() {
        let items = MemoryItemsService::new();
        items.insert("articles", json!({ "id": 1, "title": "Draft" }));
        items.update("articles", &PrimaryKey::Integer(1), json!({ "title": "Published" }));

        let result = items
            .read_by_query("articles", &query(), &Accountability::public())
            .await
            .unwrap();
        assert_eq!(result[0]["title"], "Published");

        items.delete("articles", &PrimaryKey::Integer(1));
        let result = items
            .read_by_query("articles", &query(), &Accountability::public())
            .await
            .unwrap();
        assert_eq!(result.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn fields_projection_limits_returned_keys() {
        let items = MemoryItemsService::new();
        items.insert("articles", json!({ "id": 1, "title": "Hello", "body": "secret" }));
        let mut q = query();
        q.fields = Some(vec!["id".to_string(), "title".to_string()]);
        let result = items
            .read_one("articles", &PrimaryKey::Integer(1), &q, &Accountability::public())
            .await
            .unwrap();
        assert!(result.get("body").is_none());
        assert_eq!(result["title"], "Hello");
    }

    #[tokio::test]
    async fn login_then_resolve_round_trips_identity() {
        let secret = "shared-secret".to_string();
        let user_id = Uuid::new_v4();
        let mut users = HashMap::new();
        users.insert("a@b.com".to_string(), ("pw".to_string(), user_id));
        let auth = InMemoryAuthenticationService {
            users,
            jwt_secret: secret.clone(),
            access_ttl_seconds: 900,
        };
        let resolver = InMemoryAccountabilityResolver {
            jwt_secret: secret,
            admins: HashSet::new(),
        };

        let issued = auth.login("a@b.com", "pw").await.unwrap();
        let accountability = resolver.resolve_for_token(&issued.access_token).await.unwrap();
        assert_eq!(accountability.user, Some(user_id));
        assert!(!accountability.admin);
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let mut users = HashMap::new();
        users.insert("a@b.com".to_string(), ("pw".to_string(), Uuid::new_v4()));
        let auth = InMemoryAuthenticationService {
            users,
            jwt_secret: "s".to_string(),
            access_ttl_seconds: 900,
        };
        assert!(auth.login("a@b.com", "wrong").await.is_err());
    }
}
