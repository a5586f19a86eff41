//! Wire protocol shared by both sides of the gateway (§6).
//!
//! Message envelopes are plain JSON objects. `type` is case-insensitive on
//! ingress (the connection manager uppercases it before routing); outbound
//! frames always serialize `type` in the casing the spec's tables show.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

/// A query blob attached to SUBSCRIBE/ITEMS requests. Filter/sort semantics,
/// `$CURRENT_USER`/`$NOW` placeholder resolution, and limit clamping are all
/// performed externally by [`crate::services::QuerySanitizer`] — this type
/// only carries the shape over the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Query {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Presence (non-empty) is what triggers the `MetaService.getMetaForQuery`
    /// call in §4.4 step 5.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A collection's primary key, which Directus-style collections allow to be
/// either an integer or a string (UUID, slug, etc).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Integer(i64),
    String(String),
}

impl std::fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimaryKey::Integer(i) => write!(f, "{i}"),
            PrimaryKey::String(s) => write!(f, "{s}"),
        }
    }
}

/// A message received from the client, parsed loosely — only `type` is
/// required, everything else is type-specific and optional (§3 "Message
/// envelope").
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub uid: Option<String>,
    pub collection: Option<String>,
    pub item: Option<PrimaryKey>,
    pub ids: Option<Vec<PrimaryKey>>,
    pub keys: Option<Vec<PrimaryKey>>,
    pub query: Option<Query>,
    pub data: Option<Value>,
    pub action: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub status: Option<bool>,
    pub field: Option<String>,
    /// JWT-derived expiry, if the client supplied one explicitly on AUTH
    /// (§4.2: "`expiresAt` is taken from the message (if present) or
    /// decoded from the JWT `exp` claim").
    pub expires_at: Option<i64>,
}

impl InboundEnvelope {
    /// Parse a raw text frame and uppercase its `type`, per §4.3.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut env: InboundEnvelope = serde_json::from_str(text)?;
        env.kind = env.kind.to_uppercase();
        Ok(env)
    }
}

/// Error codes from the §7 taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidPayload,
    AuthenticationFailed,
    TokenExpired,
    InvalidCollection,
    Forbidden,
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPayload, message)
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthenticationFailed, message)
    }

    pub fn token_expired() -> Self {
        Self::new(ErrorCode::TokenExpired, "Token expired")
    }

    pub fn invalid_collection(collection: &str) -> Self {
        Self::new(
            ErrorCode::InvalidCollection,
            format!("Collection \"{collection}\" is not available"),
        )
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal() -> Self {
        Self::new(ErrorCode::Internal, "An unexpected error occurred")
    }

    /// Build the `{ type, status: "error", error: { code, message }, uid? }`
    /// envelope of §6. `origin` is the original request's (lowercased) type
    /// when the error is a direct reply (`"auth"`, `"subscribe"`), or `None`
    /// for errors not tied to a specific inbound message (falls back to the
    /// literal `"error"` type).
    pub fn into_envelope(self, origin: Option<&str>, uid: Option<String>) -> OutboundEnvelope {
        OutboundEnvelope {
            kind: origin.unwrap_or("error").to_string(),
            uid,
            status: Some("error".to_string()),
            error: Some(ErrorBody {
                code: self.code,
                message: self.message,
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// A message sent to the client. Field presence varies by `kind`
/// (`"auth"`, `"subscription"`, `"items"`, `"error"`, `"ping"`).
///
/// Also the shape the client-side coordinator ([`crate::client`]) parses
/// every inbound frame into — the wire protocol is symmetric even though
/// only the server ever constructs these programmatically on its side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl OutboundEnvelope {
    pub fn auth_ok(uid: Option<String>) -> Self {
        Self {
            kind: "auth".to_string(),
            uid,
            status: Some("ok".to_string()),
            ..Default::default()
        }
    }

    pub fn subscription(
        uid: Option<String>,
        event: &str,
        payload: Value,
        meta: Option<Value>,
    ) -> Self {
        Self {
            kind: "subscription".to_string(),
            uid,
            event: Some(event.to_string()),
            payload: Some(payload),
            meta,
            ..Default::default()
        }
    }

    pub fn ping() -> Self {
        Self {
            kind: "ping".to_string(),
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = ?e, "Failed to serialize outbound envelope; this is a programming error");
            "{\"type\":\"error\",\"error\":{\"code\":\"INTERNAL\",\"message\":\"serialization failure\"}}".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_type_is_uppercased() {
        let env = InboundEnvelope::parse(r#"{"type":"subscribe","uid":"a1"}"#).unwrap();
        assert_eq!(env.kind, "SUBSCRIBE");
        assert_eq!(env.uid.as_deref(), Some("a1"));
    }

    #[test]
    fn inbound_rejects_malformed_json() {
        assert!(InboundEnvelope::parse("not json").is_err());
    }

    #[test]
    fn primary_key_accepts_integer_or_string() {
        let int_pk: PrimaryKey = serde_json::from_str("42").unwrap();
        assert_eq!(int_pk, PrimaryKey::Integer(42));
        let str_pk: PrimaryKey = serde_json::from_str("\"abc-123\"").unwrap();
        assert_eq!(str_pk, PrimaryKey::String("abc-123".to_string()));
    }

    #[test]
    fn error_envelope_shape() {
        let err = GatewayError::invalid_collection("ghosts");
        let env = err.into_envelope(Some("subscribe"), Some("a1".to_string()));
        assert_eq!(env.kind, "subscribe");
        assert_eq!(env.status.as_deref(), Some("error"));
        assert_eq!(env.error.as_ref().unwrap().code, ErrorCode::InvalidCollection);
        assert_eq!(env.uid.as_deref(), Some("a1"));
    }

    #[test]
    fn error_envelope_falls_back_to_literal_error_type() {
        let err = GatewayError::invalid_payload("bad json");
        let env = err.into_envelope(None, None);
        assert_eq!(env.kind, "error");
    }

    #[test]
    fn auth_ok_serializes_without_null_fields() {
        let json = OutboundEnvelope::auth_ok(Some("a1".into())).to_json();
        assert!(json.contains("\"type\":\"auth\""));
        assert!(json.contains("\"status\":\"ok\""));
        assert!(!json.contains("\"event\""));
        assert!(!json.contains("\"payload\""));
    }
}
