//! Authentication Primitives (§4.2): the three credential shapes an `AUTH`
//! message may carry, resolved to an [`AuthEpoch`].

pub mod jwt;

use crate::accountability::AuthEpoch;
use crate::context::Context;
use crate::protocol::{GatewayError, InboundEnvelope};

/// The three credential shapes §4.2 accepts in any `AUTH` message, in the
/// order they're tried.
enum Credentials<'a> {
    EmailPassword { email: &'a str, password: &'a str },
    RefreshToken(&'a str),
    AccessToken(&'a str),
}

impl<'a> Credentials<'a> {
    fn from_envelope(env: &'a InboundEnvelope) -> Result<Self, GatewayError> {
        if let (Some(email), Some(password)) = (env.email.as_deref(), env.password.as_deref()) {
            return Ok(Credentials::EmailPassword { email, password });
        }
        if let Some(token) = env.refresh_token.as_deref() {
            return Ok(Credentials::RefreshToken(token));
        }
        if let Some(token) = env.access_token.as_deref() {
            return Ok(Credentials::AccessToken(token));
        }
        Err(GatewayError::invalid_payload(
            "AUTH requires one of {email,password}, {refresh_token}, or {access_token}",
        ))
    }
}

/// Resolve an `AUTH` message to a fresh [`AuthEpoch`] (§4.2).
///
/// `expiresAt` resolution order: the message's own `expires_at` field (if
/// the client supplied one explicitly) takes priority, then whatever the
/// issuing service returned alongside the token, then a bare peek at the
/// JWT's `exp` claim. Any step failing yields `AUTHENTICATION_FAILED`.
pub async fn authenticate(env: &InboundEnvelope, ctx: &Context) -> Result<AuthEpoch, GatewayError> {
    let credentials = Credentials::from_envelope(env)?;

    let (token, issued_expiry) = match credentials {
        Credentials::EmailPassword { email, password } => {
            let issued = ctx.auth_service.login(email, password).await?;
            (issued.access_token, issued.expires_at)
        }
        Credentials::RefreshToken(refresh_token) => {
            let issued = ctx.auth_service.refresh(refresh_token).await?;
            (issued.access_token, issued.expires_at)
        }
        Credentials::AccessToken(token) => (token.to_string(), None),
    };

    let accountability = ctx.accountability_resolver.resolve_for_token(&token).await?;

    let expires_at = env
        .expires_at
        .or(issued_expiry)
        .or_else(|| jwt::decode_exp_unverified(&token));

    Ok(AuthEpoch {
        accountability,
        expires_at,
    })
}
