//! Minimal JWT helpers backing the bundled in-memory services (§5 demo
//! scaffolding) and the `exp`-claim peek used by the real auth primitives in
//! [`super`]. This is intentionally not a general-purpose JWT library: the
//! real token issuer is an external collaborator (§6) the gateway never
//! implements.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    iat: i64,
}

pub fn encode_hs256(user_id: Uuid, exp: i64, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
        iat: chrono::Utc::now().timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify the signature and return the subject. Used by
/// [`super::super::services::memory::InMemoryAccountabilityResolver`] to
/// stand in for `resolveAccountabilityForToken` (§6) in the demo/test
/// wiring — a real deployment's resolver almost certainly does not trust a
/// bare HS256 secret shared with this process.
pub fn decode_verified(token: &str, secret: &str) -> Result<Uuid, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| jsonwebtoken::errors::ErrorKind::InvalidSubject.into())
}

/// Decode the `exp` claim without verifying the signature. By the time this
/// runs, `resolveAccountabilityForToken` has already accepted the token
/// (§4.2) — this only recovers the expiry so the connection manager can
/// schedule its timer.
pub fn decode_exp_unverified(token: &str) -> Option<i64> {
    let claims = decode_payload_unverified(token)?;
    claims.get("exp")?.as_i64()
}

fn decode_payload_unverified(token: &str) -> Option<serde_json::Value> {
    let payload_b64 = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    serde_json::from_slice(&bytes).ok()
}
