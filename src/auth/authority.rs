//! Room membership.
//!
//! A [`RoomAuthority`] answers whether a user may join a room, and records
//! rooms created through the REST API together with their members.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::domain::{RoomId, UserId};
use crate::error::GatewayError;
use crate::persistence::models::RoomRow;

/// Outcome of a membership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAccess {
    /// The user is a member of the room.
    Granted,
    /// The room exists but the user is not a member.
    Denied,
    /// The room does not exist.
    UnknownRoom,
}

/// A room to be created with its initial members.
#[derive(Debug, Clone)]
pub struct NewRoom {
    /// Identifier of the new room.
    pub room_id: RoomId,
    /// Listing the conversation is about, if any.
    pub listing_id: Option<String>,
    /// Initial members, without duplicates.
    pub members: Vec<UserId>,
}

/// A room and its members.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomSummary {
    /// Room ID.
    pub room_id: RoomId,
    /// Listing the conversation is about, if any.
    pub listing_id: Option<String>,
    /// Members ordered by user ID.
    pub members: Vec<UserId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Decides whether a user may join a room, and owns room creation.
#[async_trait]
pub trait RoomAuthority: Send + Sync + std::fmt::Debug {
    /// Checks `user_id`'s access to `room_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the membership source is unreachable.
    async fn check_access(&self, user_id: &UserId, room_id: &RoomId)
    -> Result<RoomAccess, GatewayError>;

    /// Creates a room and its memberships in one step.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::RoomAlreadyExists`] if the ID is taken and
    /// [`GatewayError::PersistenceError`] if the write fails.
    async fn create_room(&self, room: &NewRoom) -> Result<RoomSummary, GatewayError>;

    /// Lists the rooms `user_id` is a member of, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the membership source is unreachable.
    async fn rooms_for(&self, user_id: &UserId) -> Result<Vec<RoomSummary>, GatewayError>;
}

/// Membership backed by the `chat_rooms` / `chat_room_members` tables.
#[derive(Debug, Clone)]
pub struct PostgresRoomAuthority {
    pool: PgPool,
}

impl PostgresRoomAuthority {
    /// Creates an authority reading from `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomAuthority for PostgresRoomAuthority {
    async fn check_access(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<RoomAccess, GatewayError> {
        let (room_exists, is_member) = sqlx::query_as::<_, (bool, bool)>(
            "SELECT EXISTS (SELECT 1 FROM chat_rooms WHERE id = $1), \
                    EXISTS (SELECT 1 FROM chat_room_members WHERE room_id = $1 AND user_id = $2)",
        )
        .bind(room_id.as_str())
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        Ok(match (room_exists, is_member) {
            (false, _) => RoomAccess::UnknownRoom,
            (true, false) => RoomAccess::Denied,
            (true, true) => RoomAccess::Granted,
        })
    }

    async fn create_room(&self, room: &NewRoom) -> Result<RoomSummary, GatewayError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        let created_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "INSERT INTO chat_rooms (id, listing_id) VALUES ($1, $2) RETURNING created_at",
        )
        .bind(room.room_id.as_str())
        .bind(room.listing_id.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                GatewayError::RoomAlreadyExists(room.room_id.clone())
            }
            _ => GatewayError::PersistenceError(e.to_string()),
        })?;

        for member in &room.members {
            sqlx::query(
                "INSERT INTO chat_room_members (room_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(room.room_id.as_str())
            .bind(member.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        let mut members = room.members.clone();
        members.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(RoomSummary {
            room_id: room.room_id.clone(),
            listing_id: room.listing_id.clone(),
            members,
            created_at,
        })
    }

    async fn rooms_for(&self, user_id: &UserId) -> Result<Vec<RoomSummary>, GatewayError> {
        let rows = sqlx::query_as::<_, RoomRow>(
            "SELECT r.id, r.listing_id, r.created_at, \
                    array_agg(m.user_id ORDER BY m.user_id) AS members \
             FROM chat_rooms r \
             JOIN chat_room_members m ON m.room_id = r.id \
             WHERE EXISTS (SELECT 1 FROM chat_room_members me \
                           WHERE me.room_id = r.id AND me.user_id = $1) \
             GROUP BY r.id, r.listing_id, r.created_at \
             ORDER BY r.created_at DESC, r.id ASC",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        rows.into_iter().map(RoomSummary::try_from).collect()
    }
}

#[derive(Debug)]
struct RoomRecord {
    listing_id: Option<String>,
    members: HashSet<UserId>,
    created_at: DateTime<Utc>,
}

impl RoomRecord {
    fn new(listing_id: Option<String>) -> Self {
        Self {
            listing_id,
            members: HashSet::new(),
            created_at: Utc::now(),
        }
    }

    fn summary(&self, room_id: &RoomId) -> RoomSummary {
        let mut members: Vec<UserId> = self.members.iter().cloned().collect();
        members.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        RoomSummary {
            room_id: room_id.clone(),
            listing_id: self.listing_id.clone(),
            members,
            created_at: self.created_at,
        }
    }
}

/// In-memory membership, for development without a database and for tests.
///
/// An open authority grants every user access to every room.
#[derive(Debug, Default)]
pub struct InMemoryRoomAuthority {
    open: bool,
    rooms: RwLock<HashMap<RoomId, RoomRecord>>,
}

impl InMemoryRoomAuthority {
    /// Grants everyone access to every room.
    #[must_use]
    pub fn open() -> Self {
        Self {
            open: true,
            rooms: RwLock::default(),
        }
    }

    /// Only rooms added through [`InMemoryRoomAuthority::add_member`] exist.
    #[must_use]
    pub fn closed() -> Self {
        Self::default()
    }

    /// Creates `room_id` if needed and adds `user_id` to it.
    pub async fn add_member(&self, room_id: RoomId, user_id: UserId) {
        self.rooms
            .write()
            .await
            .entry(room_id)
            .or_insert_with(|| RoomRecord::new(None))
            .members
            .insert(user_id);
    }
}

#[async_trait]
impl RoomAuthority for InMemoryRoomAuthority {
    async fn check_access(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<RoomAccess, GatewayError> {
        if self.open {
            return Ok(RoomAccess::Granted);
        }
        let rooms = self.rooms.read().await;
        Ok(match rooms.get(room_id) {
            None => RoomAccess::UnknownRoom,
            Some(room) if room.members.contains(user_id) => RoomAccess::Granted,
            Some(_) => RoomAccess::Denied,
        })
    }

    async fn create_room(&self, room: &NewRoom) -> Result<RoomSummary, GatewayError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.room_id) {
            return Err(GatewayError::RoomAlreadyExists(room.room_id.clone()));
        }
        let mut record = RoomRecord::new(room.listing_id.clone());
        record.members.extend(room.members.iter().cloned());
        let summary = record.summary(&room.room_id);
        rooms.insert(room.room_id.clone(), record);
        Ok(summary)
    }

    async fn rooms_for(&self, user_id: &UserId) -> Result<Vec<RoomSummary>, GatewayError> {
        let rooms = self.rooms.read().await;
        let mut summaries: Vec<RoomSummary> = rooms
            .iter()
            .filter(|(_, room)| room.members.contains(user_id))
            .map(|(id, room)| room.summary(id))
            .collect();
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        Ok(summaries)
    }
}
