//! The identity principal attached to a connection (§3 "Accountability").

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Immutable for the duration of one auth epoch; replaced wholesale on
/// re-auth or token refresh — never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Accountability {
    pub user: Option<Uuid>,
    pub role: Option<Uuid>,
    pub admin: bool,
    /// Opaque permission rule set, interpreted only by the external
    /// `ItemsService`/`MetaService` implementations this gateway delegates
    /// to — the gateway itself never inspects permission rules.
    pub permissions: Arc<Value>,
    pub share: Option<Uuid>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Accountability {
    /// The accountability of an unauthenticated connection: `public` mode,
    /// or the gap between a TOKEN_EXPIRED timer firing and a fresh AUTH.
    pub fn public() -> Self {
        Self {
            user: None,
            role: None,
            admin: false,
            permissions: Arc::new(Value::Null),
            share: None,
            ip: None,
            user_agent: None,
        }
    }

    pub fn is_public(&self) -> bool {
        self.user.is_none() && self.role.is_none() && !self.admin
    }
}

/// Per-connection auth record (§3 "AuthEpoch"). `expires_at == None` means
/// "never expires at this layer" — public or externally managed.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEpoch {
    pub accountability: Accountability,
    pub expires_at: Option<i64>,
}

impl AuthEpoch {
    /// The epoch a connection starts in before any successful AUTH, and the
    /// epoch an inline AUTH failure resets it to (§4.2: "failure clears the
    /// epoch to `{ null, null }` but does not close the socket").
    pub fn empty() -> Self {
        Self {
            accountability: Accountability::public(),
            expires_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accountability.is_public() && self.expires_at.is_none()
    }
}

impl Default for AuthEpoch {
    fn default() -> Self {
        Self::empty()
    }
}
