//! Database rows for the `chat_messages` and `chat_rooms` tables.

use chrono::{DateTime, Utc};

use crate::auth::RoomSummary;
use crate::domain::{ChatMessage, RoomId, UserId};
use crate::error::GatewayError;

/// A row of the `chat_messages` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    /// Room key.
    pub room_id: String,
    /// Sequence number (`BIGINT`, never negative).
    pub seq: i64,
    /// Sender user ID.
    pub sender_id: String,
    /// Message body.
    pub body: String,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = GatewayError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let seq = u64::try_from(row.seq).map_err(|_| {
            GatewayError::PersistenceError(format!("negative sequence {} in storage", row.seq))
        })?;
        Ok(Self {
            room_id: RoomId::parse(&row.room_id)?,
            seq,
            sender_id: UserId::parse(&row.sender_id)?,
            body: row.body,
            created_at: row.created_at,
        })
    }
}

/// A `chat_rooms` row joined with its aggregated member list.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoomRow {
    /// Room key.
    pub id: String,
    /// Listing the conversation is about, if any.
    pub listing_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Member user IDs, ordered.
    pub members: Vec<String>,
}

impl TryFrom<RoomRow> for RoomSummary {
    type Error = GatewayError;

    fn try_from(row: RoomRow) -> Result<Self, Self::Error> {
        let members = row
            .members
            .iter()
            .map(|m| UserId::parse(m))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            room_id: RoomId::parse(&row.id)?,
            listing_id: row.listing_id,
            members,
            created_at: row.created_at,
        })
    }
}

/// Converts a sequence number to the `BIGINT` column type.
///
/// # Errors
///
/// Returns [`GatewayError::PersistenceError`] if `seq` exceeds `i64::MAX`.
pub fn seq_to_db(seq: u64) -> Result<i64, GatewayError> {
    i64::try_from(seq)
        .map_err(|_| GatewayError::PersistenceError(format!("sequence {seq} out of range")))
}
