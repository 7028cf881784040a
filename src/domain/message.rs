//! Chat messages as persisted and broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{RoomId, UserId};

/// A message accepted by a room.
///
/// Identity is `(room_id, seq)`. The sequence number and timestamp are
/// assigned by the room at publish time and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Per-room sequence number, strictly increasing without gaps.
    pub seq: u64,
    /// Author of the message.
    pub sender_id: UserId,
    /// Opaque message body supplied by the sender.
    pub body: String,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}
