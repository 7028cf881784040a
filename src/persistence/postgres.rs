//! PostgreSQL implementation of the persistence layer.

use async_trait::async_trait;
use sqlx::PgPool;

use super::MessageStore;
use super::models::{MessageRow, seq_to_db};
use crate::domain::{ChatMessage, RoomId};
use crate::error::GatewayError;

/// PostgreSQL-backed message store using `sqlx::PgPool`.
///
/// Messages live in `chat_messages` with primary key `(room_id, seq)`, so a
/// duplicate sequence number is rejected by the database itself.
#[derive(Debug, Clone)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    /// Creates a new store with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO chat_messages (room_id, seq, sender_id, body, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message.room_id.as_str())
        .bind(seq_to_db(message.seq)?)
        .bind(message.sender_id.as_str())
        .bind(&message.body)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        Ok(())
    }

    async fn fetch_history(
        &self,
        room_id: &RoomId,
        since_seq: u64,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT room_id, seq, sender_id, body, created_at FROM chat_messages \
             WHERE room_id = $1 AND seq > $2 ORDER BY seq ASC LIMIT $3",
        )
        .bind(room_id.as_str())
        .bind(seq_to_db(since_seq)?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn latest_sequence(&self, room_id: &RoomId) -> Result<u64, GatewayError> {
        let latest = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(seq) FROM chat_messages WHERE room_id = $1",
        )
        .bind(room_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        let latest = latest.unwrap_or(0);
        u64::try_from(latest).map_err(|_| {
            GatewayError::PersistenceError(format!("negative sequence {latest} in storage"))
        })
    }
}
