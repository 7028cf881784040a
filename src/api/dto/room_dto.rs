//! Room, history and presence DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::RoomSummary;
use crate::domain::{ChatMessage, ParticipantInfo, RoomId};

/// Request body for `POST /rooms`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CreateRoomRequest {
    /// Room ID to use; a random one is assigned when absent.
    pub room_id: Option<String>,
    /// Listing the conversation is about.
    pub listing_id: Option<String>,
    /// Other members. The caller is always a member.
    #[serde(default)]
    pub members: Vec<String>,
}

/// Rooms the caller belongs to.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomListResponse {
    /// Rooms, newest first.
    pub rooms: Vec<RoomSummary>,
}

/// Query parameters for `GET /rooms/{room_id}/messages`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct HistoryParams {
    /// Only messages with a greater sequence number are returned.
    #[serde(default)]
    pub since_seq: u64,
    /// Page size; defaults to and is capped by the server's page limit.
    pub limit: Option<u32>,
}

/// A page of room history in sequence order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryResponse {
    /// Room the messages belong to.
    pub room_id: RoomId,
    /// Messages ordered by ascending `seq`.
    pub messages: Vec<ChatMessage>,
    /// Sequence number to pass as `since_seq` for the next page, if the
    /// page was not empty.
    pub next_since_seq: Option<u64>,
}

/// Sessions currently connected to a room.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantsResponse {
    /// Room ID.
    pub room_id: RoomId,
    /// Connected sessions ordered by user ID.
    pub participants: Vec<ParticipantInfo>,
}
