//! Process-wide directory of live rooms.
//!
//! [`RoomRegistry`] maps room IDs to [`Room`]s behind a single
//! [`tokio::sync::RwLock`] scoped to the map. Rooms are created lazily on
//! the first admission and retired once they have been empty for the
//! retirement grace period with no admission in flight.
//!
//! # Concurrency
//!
//! - The map lock is held only for lookups, inserts and removals, never
//!   during publishing or broadcasting.
//! - An admission marks the room as pending while still under the map lock
//!   (see [`RoomReservation`]); retirement checks that mark under the same
//!   lock, so a room is never retired while a join is in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use super::room::{Room, RoomLimits};
use super::session::{CloseReason, SessionHandle};
use super::{ConnectionId, RoomId};
use crate::error::AdmissionError;
use crate::persistence::MessageStore;

/// A room handed out for one admission.
///
/// Keeps the room from being retired until it is consumed by
/// [`RoomReservation::join`] or dropped.
#[derive(Debug)]
pub struct RoomReservation {
    room: Arc<Room>,
}

impl RoomReservation {
    /// Returns the reserved room.
    #[must_use]
    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    /// Joins `session` to the reserved room and releases the reservation.
    ///
    /// # Errors
    ///
    /// Propagates [`Room::join`] failures.
    pub async fn join(self, session: SessionHandle) -> Result<Arc<Room>, AdmissionError> {
        self.room.join(session).await?;
        Ok(Arc::clone(&self.room))
    }
}

impl Drop for RoomReservation {
    fn drop(&mut self) {
        self.room.end_admission();
    }
}

/// Live room and session counts.
#[derive(Debug, Clone, Copy, Default, Serialize, ToSchema)]
pub struct RegistryStats {
    /// Rooms currently in the registry.
    pub rooms: usize,
    /// Sessions joined across all rooms.
    pub sessions: usize,
}

/// Central directory of live rooms.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    store: Arc<dyn MessageStore>,
    limits: RoomLimits,
    retire_grace: Duration,
    shutting_down: AtomicBool,
}

impl RoomRegistry {
    /// Creates an empty registry. Rooms it creates persist through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, limits: RoomLimits, retire_grace: Duration) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            store,
            limits,
            retire_grace,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Returns the existing room for `room_id` or creates it, and marks an
    /// admission as pending on it.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Unavailable`] once [`RoomRegistry::shutdown`]
    /// has started.
    pub async fn get_or_create(&self, room_id: &RoomId) -> Result<RoomReservation, AdmissionError> {
        let mut rooms = self.rooms.write().await;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AdmissionError::Unavailable(room_id.clone()));
        }
        let room = rooms.entry(room_id.clone()).or_insert_with(|| {
            tracing::info!(%room_id, "room created");
            Arc::new(Room::new(
                room_id.clone(),
                self.limits,
                Arc::clone(&self.store),
            ))
        });
        room.begin_admission();
        Ok(RoomReservation {
            room: Arc::clone(room),
        })
    }

    /// Returns the live room for `room_id` without creating it.
    pub async fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Retires the room if it is empty, has no pending admission and has
    /// been empty for at least the retirement grace. Returns `true` if the
    /// room was removed.
    pub async fn try_retire(&self, room_id: &RoomId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id) else {
            return false;
        };
        if !room.is_retirable(self.retire_grace).await {
            return false;
        }
        let Some(room) = rooms.remove(room_id) else {
            return false;
        };
        room.close(CloseReason::RoomRetired).await;
        tracing::info!(%room_id, "room retired");
        true
    }

    /// Removes `connection_id` from `room` and, if that emptied the room,
    /// schedules its retirement after the grace period. Idempotent.
    pub async fn release(self: &Arc<Self>, room: &Room, connection_id: ConnectionId) {
        if room.leave(connection_id).await {
            self.schedule_retire(room.id().clone());
        }
    }

    /// Spawns a task that attempts retirement once the grace has elapsed.
    pub fn schedule_retire(self: &Arc<Self>, room_id: RoomId) {
        let registry = Arc::clone(self);
        let grace = self.retire_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.try_retire(&room_id).await;
        });
    }

    /// Returns live room and session counts.
    pub async fn stats(&self) -> RegistryStats {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut stats = RegistryStats {
            rooms: rooms.len(),
            sessions: 0,
        };
        for room in rooms {
            stats.sessions += room.len().await;
        }
        stats
    }

    /// Returns the number of live rooms.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Returns `true` if no room is live.
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    /// Refuses new rooms, closes every room and session, and empties the
    /// registry. Returns the number of sessions closed.
    pub async fn shutdown(&self) -> usize {
        let rooms: Vec<Arc<Room>> = {
            let mut map = self.rooms.write().await;
            self.shutting_down.store(true, Ordering::SeqCst);
            map.drain().map(|(_, room)| room).collect()
        };
        let mut closed = 0;
        for room in &rooms {
            closed += room.close(CloseReason::ServerShutdown).await;
        }
        tracing::info!(rooms = rooms.len(), sessions = closed, "room registry shut down");
        closed
    }
}
