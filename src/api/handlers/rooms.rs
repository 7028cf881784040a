//! Room handlers: creation, listing, history and participants.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{
    CreateRoomRequest, HistoryParams, HistoryResponse, ParticipantsResponse, RoomListResponse,
};
use crate::app_state::AppState;
use crate::auth::{AuthUser, RoomSummary};
use crate::domain::{RoomId, UserId};
use crate::error::{ErrorResponse, GatewayError};

/// `POST /rooms`: Create a room with its members.
///
/// # Errors
///
/// Returns [`GatewayError`] if an ID is invalid, the room ID is taken or
/// the room cannot be recorded.
#[utoipa::path(
    post,
    path = "/api/v1/rooms",
    tag = "Rooms",
    summary = "Create room",
    description = "Creates a room. The caller always becomes a member, in addition to the listed members.",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = RoomSummary),
        (status = 400, description = "Invalid room or user ID", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 409, description = "Room ID already in use", body = ErrorResponse),
    )
)]
pub async fn create_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let room_id = req.room_id.as_deref().map(RoomId::parse).transpose()?;
    let members = req
        .members
        .iter()
        .map(|m| UserId::parse(m))
        .collect::<Result<Vec<_>, _>>()?;

    let summary = state
        .gateway
        .create_room(user_id, room_id, req.listing_id, members)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// `GET /rooms`: Rooms the caller is a member of.
///
/// # Errors
///
/// Returns [`GatewayError`] if memberships cannot be read.
#[utoipa::path(
    get,
    path = "/api/v1/rooms",
    tag = "Rooms",
    summary = "List rooms",
    description = "Lists the rooms the caller is a member of, newest first.",
    responses(
        (status = 200, description = "Caller's rooms", body = RoomListResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn list_rooms(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, GatewayError> {
    let rooms = state.gateway.list_rooms(&user_id).await?;
    Ok(Json(RoomListResponse { rooms }))
}

/// `GET /rooms/{room_id}/messages`: Room history after a sequence number.
///
/// # Errors
///
/// Returns [`GatewayError`] if the caller is not a member of the room or
/// the store fails.
#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/messages",
    tag = "Rooms",
    summary = "Room history",
    description = "Returns persisted messages with `seq > since_seq` in sequence order. Clients use it to resynchronize after a reconnect.",
    params(
        ("room_id" = String, Path, description = "Room ID"),
        HistoryParams,
    ),
    responses(
        (status = 200, description = "History page", body = HistoryResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Not a member of the room", body = ErrorResponse),
        (status = 404, description = "Room not found", body = ErrorResponse),
    )
)]
pub async fn get_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let room_id = RoomId::parse(&room_id)?;
    state.gateway.authorize(&user_id, &room_id).await?;

    let messages = state
        .gateway
        .history(&room_id, params.since_seq, params.limit)
        .await?;
    let next_since_seq = messages.last().map(|m| m.seq);

    Ok(Json(HistoryResponse {
        room_id,
        messages,
        next_since_seq,
    }))
}

/// `GET /rooms/{room_id}/participants`: Sessions connected right now.
///
/// # Errors
///
/// Returns [`GatewayError`] if the caller is not a member of the room.
#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/participants",
    tag = "Rooms",
    summary = "Room participants",
    description = "Lists the sessions currently joined to the room on this server. A room with no live sessions returns an empty list.",
    params(
        ("room_id" = String, Path, description = "Room ID"),
    ),
    responses(
        (status = 200, description = "Connected sessions", body = ParticipantsResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Not a member of the room", body = ErrorResponse),
        (status = 404, description = "Room not found", body = ErrorResponse),
    )
)]
pub async fn get_participants(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let room_id = RoomId::parse(&room_id)?;
    state.gateway.authorize(&user_id, &room_id).await?;

    let participants = match state.gateway.registry().get(&room_id).await {
        Some(room) => room.participants().await,
        None => Vec::new(),
    };

    Ok(Json(ParticipantsResponse {
        room_id,
        participants,
    }))
}

/// Room routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/{room_id}/messages", get(get_history))
        .route("/rooms/{room_id}/participants", get(get_participants))
}
