//! A chat room: membership, message ordering and fan-out.
//!
//! [`Room`] serializes all mutations per room. Membership sits behind a
//! short-lived lock that is never held across I/O; publishing holds the
//! room's sequencer lock from sequence assignment through persistence to
//! broadcast, so within a room the broadcast order, the sequence order and
//! the persistence order are the same.
//!
//! Delivery never blocks on a slow member: every session has a bounded
//! queue and a full queue causes that member to miss the message and be
//! marked `Draining` (drop-and-mark). The store stays the source of truth,
//! so a dropped member can resynchronize from history after reconnecting.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use utoipa::ToSchema;

use super::session::{CloseReason, Delivery, Outbound, SessionHandle, SessionState};
use super::{ChatMessage, ConnectionId, RoomId, UserId};
use crate::error::{AdmissionError, GatewayError, PublishError};
use crate::persistence::MessageStore;

/// Per-room limits.
#[derive(Debug, Clone, Copy)]
pub struct RoomLimits {
    /// Maximum number of simultaneously joined sessions.
    pub max_participants: usize,
}

/// Snapshot of one joined session, for presence queries.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantInfo {
    /// Connection identifier.
    pub connection_id: ConnectionId,
    /// Connected user.
    pub user_id: UserId,
    /// Session state at snapshot time.
    pub state: SessionState,
    /// Time of the last inbound frame.
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug)]
struct Members {
    sessions: HashMap<ConnectionId, SessionHandle>,
    closed: bool,
    emptied_at: Option<Instant>,
}

#[derive(Debug)]
struct Sequencer {
    /// Highest sequence number persisted; `None` until seeded from the store.
    last_seq: Option<u64>,
}

/// Broadcast and ordering unit for one conversation.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    limits: RoomLimits,
    store: Arc<dyn MessageStore>,
    members: Mutex<Members>,
    sequencer: Mutex<Sequencer>,
    pending_admissions: AtomicUsize,
    created_at: DateTime<Utc>,
}

impl Room {
    /// Creates an empty room. The sequence counter is seeded from the store
    /// on first use.
    #[must_use]
    pub fn new(id: RoomId, limits: RoomLimits, store: Arc<dyn MessageStore>) -> Self {
        Self {
            id,
            limits,
            store,
            members: Mutex::new(Members {
                sessions: HashMap::new(),
                closed: false,
                emptied_at: Some(Instant::now()),
            }),
            sequencer: Mutex::new(Sequencer { last_seq: None }),
            pending_admissions: AtomicUsize::new(0),
            created_at: Utc::now(),
        }
    }

    /// Returns the room identifier.
    #[must_use]
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Returns when this room instance was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Adds a session to the room. Joining twice with the same connection
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::RoomFull`] when the participant limit is
    /// reached and [`AdmissionError::Unavailable`] if the room was closed.
    pub async fn join(&self, session: SessionHandle) -> Result<(), AdmissionError> {
        let mut members = self.members.lock().await;
        if members.closed {
            return Err(AdmissionError::Unavailable(self.id.clone()));
        }
        let connection_id = session.connection_id();
        if members.sessions.contains_key(&connection_id) {
            return Ok(());
        }
        if members.sessions.len() >= self.limits.max_participants {
            return Err(AdmissionError::RoomFull(self.id.clone()));
        }
        members.sessions.insert(connection_id, session);
        members.emptied_at = None;
        tracing::debug!(
            room_id = %self.id,
            %connection_id,
            participants = members.sessions.len(),
            "session joined room"
        );
        Ok(())
    }

    /// Removes a session. Idempotent.
    ///
    /// Returns `true` only when this call removed the last member.
    pub async fn leave(&self, connection_id: ConnectionId) -> bool {
        let mut members = self.members.lock().await;
        if members.sessions.remove(&connection_id).is_none() {
            return false;
        }
        tracing::debug!(
            room_id = %self.id,
            %connection_id,
            participants = members.sessions.len(),
            "session left room"
        );
        if members.sessions.is_empty() {
            members.emptied_at = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Assigns the next sequence number, persists the message and then
    /// broadcasts it to every active member, the sender included.
    ///
    /// Nothing is broadcast and the counter is not advanced unless the store
    /// accepted the message.
    ///
    /// # Errors
    ///
    /// - [`PublishError::RoomClosed`] if the room was retired or shut down.
    /// - [`PublishError::NotActive`] if `sender` is not an active member.
    /// - [`PublishError::Persistence`] if the store rejected the write.
    pub async fn publish(
        &self,
        sender: &SessionHandle,
        body: String,
    ) -> Result<Arc<ChatMessage>, PublishError> {
        let mut sequencer = self.sequencer.lock().await;

        {
            let members = self.members.lock().await;
            if members.closed {
                return Err(PublishError::RoomClosed);
            }
            if !members.sessions.contains_key(&sender.connection_id())
                || sender.state() != SessionState::Active
            {
                return Err(PublishError::NotActive);
            }
        }

        let last = self
            .seed(&mut sequencer)
            .await
            .map_err(|e| PublishError::Persistence(e.to_string()))?;
        let seq = last
            .checked_add(1)
            .ok_or_else(|| PublishError::Persistence("sequence space exhausted".to_string()))?;

        let message = ChatMessage {
            room_id: self.id.clone(),
            seq,
            sender_id: sender.user_id().clone(),
            body,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.save_message(&message).await {
            tracing::warn!(room_id = %self.id, seq, error = %e, "failed to persist message");
            return Err(PublishError::Persistence(e.to_string()));
        }
        sequencer.last_seq = Some(seq);

        let message = Arc::new(message);
        self.broadcast(&message).await;
        Ok(message)
    }

    /// Returns the highest persisted sequence number of this room.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the counter has not
    /// been seeded yet and the store lookup fails.
    pub async fn last_sequence(&self) -> Result<u64, GatewayError> {
        let mut sequencer = self.sequencer.lock().await;
        self.seed(&mut sequencer).await
    }

    /// Moves a joined session to `Active` and queues its
    /// [`Outbound::Joined`] item. Returns the last accepted sequence number.
    ///
    /// Runs under the sequencer lock, so the joined item precedes every
    /// broadcast the session receives and every later broadcast carries a
    /// sequence number above the returned one.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the counter cannot be
    /// seeded from the store.
    pub async fn activate(&self, session: &SessionHandle) -> Result<u64, GatewayError> {
        let mut sequencer = self.sequencer.lock().await;
        let last_seq = self.seed(&mut sequencer).await?;
        session.deliver(Outbound::Joined { last_seq });
        session.activate();
        Ok(last_seq)
    }

    /// Closes the room and every member session. Later joins and publishes
    /// fail. Returns the number of sessions closed.
    pub async fn close(&self, reason: CloseReason) -> usize {
        let mut members = self.members.lock().await;
        members.closed = true;
        members.emptied_at = Some(Instant::now());
        let mut closed = 0;
        for (_, session) in members.sessions.drain() {
            if session.close(reason) {
                closed += 1;
            }
        }
        tracing::debug!(room_id = %self.id, sessions = closed, reason = reason.as_str(), "room closed");
        closed
    }

    /// Returns `true` once [`Room::close`] has run.
    pub async fn is_closed(&self) -> bool {
        self.members.lock().await.closed
    }

    /// Returns a snapshot of the joined sessions ordered by user ID.
    pub async fn participants(&self) -> Vec<ParticipantInfo> {
        let members = self.members.lock().await;
        let mut list: Vec<ParticipantInfo> = members
            .sessions
            .values()
            .map(|s| ParticipantInfo {
                connection_id: s.connection_id(),
                user_id: s.user_id().clone(),
                state: s.state(),
                last_activity: s.last_activity(),
            })
            .collect();
        list.sort_by(|a, b| {
            a.user_id
                .as_str()
                .cmp(b.user_id.as_str())
                .then_with(|| a.connection_id.as_uuid().cmp(b.connection_id.as_uuid()))
        });
        list
    }

    /// Returns the number of joined sessions.
    pub async fn len(&self) -> usize {
        self.members.lock().await.sessions.len()
    }

    /// Returns `true` if no session is joined.
    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.sessions.is_empty()
    }

    pub(crate) fn begin_admission(&self) {
        self.pending_admissions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_admission(&self) {
        self.pending_admissions.fetch_sub(1, Ordering::SeqCst);
    }

    /// Empty, no admission in flight, and empty for at least `grace`.
    pub(crate) async fn is_retirable(&self, grace: Duration) -> bool {
        if self.pending_admissions.load(Ordering::SeqCst) > 0 {
            return false;
        }
        let members = self.members.lock().await;
        members.sessions.is_empty()
            && members
                .emptied_at
                .is_some_and(|emptied| emptied.elapsed() >= grace)
    }

    async fn seed(&self, sequencer: &mut Sequencer) -> Result<u64, GatewayError> {
        if let Some(last) = sequencer.last_seq {
            return Ok(last);
        }
        let last = self.store.latest_sequence(&self.id).await?;
        sequencer.last_seq = Some(last);
        Ok(last)
    }

    async fn broadcast(&self, message: &Arc<ChatMessage>) {
        let members = self.members.lock().await;
        let mut delivered = 0usize;
        let mut dropped = 0usize;
        for session in members.sessions.values() {
            if session.state() != SessionState::Active {
                continue;
            }
            match session.deliver(Outbound::Message(Arc::clone(message))) {
                Delivery::Queued => delivered += 1,
                Delivery::Full | Delivery::Closed => dropped += 1,
            }
        }
        tracing::debug!(
            room_id = %self.id,
            seq = message.seq,
            delivered,
            dropped,
            "message broadcast"
        );
    }
}
