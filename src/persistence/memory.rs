//! In-memory message store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::MessageStore;
use crate::domain::{ChatMessage, RoomId};
use crate::error::GatewayError;

/// Message store backed by a per-room ordered map.
///
/// Used when `PERSISTENCE_ENABLED=false` and throughout the test suite.
/// History does not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    rooms: RwLock<HashMap<RoomId, BTreeMap<u64, ChatMessage>>>,
}

impl InMemoryMessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of messages stored for `room_id`.
    pub async fn count(&self, room_id: &RoomId) -> usize {
        self.rooms.read().await.get(room_id).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<(), GatewayError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(message.room_id.clone()).or_default();
        if room.contains_key(&message.seq) {
            return Err(GatewayError::PersistenceError(format!(
                "duplicate sequence {} in room {}",
                message.seq, message.room_id
            )));
        }
        room.insert(message.seq, message.clone());
        Ok(())
    }

    async fn fetch_history(
        &self,
        room_id: &RoomId,
        since_seq: u64,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return Ok(Vec::new());
        };
        let Some(start) = since_seq.checked_add(1) else {
            return Ok(Vec::new());
        };
        Ok(room
            .range(start..)
            .take(limit as usize)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn latest_sequence(&self, room_id: &RoomId) -> Result<u64, GatewayError> {
        let rooms = self.rooms.read().await;
        Ok(rooms
            .get(room_id)
            .and_then(|room| room.keys().next_back().copied())
            .unwrap_or(0))
    }
}
