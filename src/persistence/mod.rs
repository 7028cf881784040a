//! Persistence layer: durable message history.
//!
//! Rooms persist every message through the [`MessageStore`] trait before
//! broadcasting it. The store is the source of truth for history: clients
//! that missed broadcasts resynchronize with [`MessageStore::fetch_history`].
//! Two implementations are provided: PostgreSQL via `sqlx` and an in-memory
//! store for development and tests.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{ChatMessage, RoomId};
use crate::error::GatewayError;

pub use memory::InMemoryMessageStore;
pub use postgres::PostgresMessageStore;

/// Durable storage for room messages.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Persists a message whose sequence number was assigned by its room.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the write fails or the
    /// `(room_id, seq)` pair already exists.
    async fn save_message(&self, message: &ChatMessage) -> Result<(), GatewayError>;

    /// Returns up to `limit` messages of `room_id` with `seq > since_seq`,
    /// ordered by ascending sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn fetch_history(
        &self,
        room_id: &RoomId,
        since_seq: u64,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, GatewayError>;

    /// Returns the highest stored sequence number of `room_id`, or `0` when
    /// the room has no messages.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] on storage failure.
    async fn latest_sequence(&self, room_id: &RoomId) -> Result<u64, GatewayError>;
}
