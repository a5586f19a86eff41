//! Upgrade & Auth Controller (§4.1): turns an HTTP upgrade request into
//! either a rejected socket or a fully-initialized connection handed to
//! [`super::handler::run_connection`].

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::accountability::AuthEpoch;
use crate::config::AuthMode;
use crate::error::AppError;
use crate::state::GatewayState;

#[derive(Debug, Deserialize, Default)]
pub struct UpgradeParams {
    pub access_token: Option<String>,
}

/// `GET <websockets_rest_path>` (§4.1).
///
/// - `public`: admitted unconditionally, `accountability = null`.
/// - `strict`: `access_token` must resolve to a non-null user, or the
///   upgrade is rejected with `401` before the socket is ever accepted.
/// - `handshake`: admitted unconditionally; the first frame must be `AUTH`
///   (enforced inside [`super::handler::run_connection`]).
pub async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<UpgradeParams>,
    State(state): State<GatewayState>,
) -> Response {
    match state.config.websockets_rest_auth {
        AuthMode::Public => {
            ws.on_upgrade(move |socket| super::handler::run_connection(socket, AuthEpoch::empty(), state))
        }
        AuthMode::Handshake => {
            ws.on_upgrade(move |socket| super::handler::run_connection(socket, AuthEpoch::empty(), state))
        }
        AuthMode::Strict => {
            let Some(token) = params.access_token else {
                return AppError::Auth("access_token query parameter required".into()).into_response();
            };
            let accountability = match state.context.accountability_resolver.resolve_for_token(&token).await {
                Ok(accountability) => accountability,
                Err(_) => return AppError::Auth("Invalid or expired token".into()).into_response(),
            };
            if accountability.user.is_none() {
                return AppError::Auth("Token did not resolve to a user".into()).into_response();
            }
            let expires_at = crate::auth::jwt::decode_exp_unverified(&token);
            let epoch = AuthEpoch {
                accountability,
                expires_at,
            };
            ws.on_upgrade(move |socket| super::handler::run_connection(socket, epoch, state))
        }
    }
}
