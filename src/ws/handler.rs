//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use utoipa::IntoParams;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::domain::{CloseReason, RoomId};
use crate::error::GatewayError;

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize, IntoParams)]
pub struct WsQuery {
    /// Room to join.
    pub room_id: String,
    /// Access token, when no `Authorization` header can be sent.
    pub token: Option<String>,
}

/// `GET /ws?room_id=…`: Admit the caller into a room and upgrade to
/// WebSocket.
///
/// Admission runs before the upgrade, so refusals are plain HTTP errors
/// (401, 403, 404, 409, 503).
///
/// # Errors
///
/// Returns a [`GatewayError`] if the room ID is invalid or admission fails.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<WsQuery>,
) -> Result<Response, GatewayError> {
    let room_id = RoomId::parse(&query.room_id)?;
    let gateway = Arc::clone(&state.gateway);
    let admission = gateway.admit(user_id, room_id).await?;

    let session = admission.session.clone();
    Ok(ws
        .on_failed_upgrade(move |error| {
            tracing::warn!(
                connection_id = %session.connection_id(),
                %error,
                "websocket upgrade failed"
            );
            session.close(CloseReason::TransportError);
        })
        .on_upgrade(move |socket| run_connection(socket, admission, gateway))
        .into_response())
}
