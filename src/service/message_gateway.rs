//! Message gateway: admission into rooms and history relay.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::{NewRoom, RoomAccess, RoomAuthority, RoomSummary};
use crate::config::RealtimeConfig;
use crate::domain::{
    ChatMessage, CloseReason, Outbound, Room, RoomId, RoomRegistry, SessionHandle, SessionState,
    UserId,
};
use crate::error::{AdmissionError, GatewayError};
use crate::persistence::MessageStore;

/// A session admitted into a room, ready to be driven by a transport.
#[derive(Debug)]
pub struct Admission {
    /// The session, already `Active` and joined.
    pub session: SessionHandle,
    /// Receiving end of the session's outbound queue.
    pub outbound: mpsc::Receiver<Outbound>,
    /// The room the session joined.
    pub room: Arc<Room>,
}

/// Entry point of the real-time subsystem.
///
/// Coordinates the membership authority, the room registry and the message
/// store. Every admission follows: authorize → create session → reserve
/// room → join → activate → start the drain watchdog.
#[derive(Debug)]
pub struct MessageGateway {
    registry: Arc<RoomRegistry>,
    authority: Arc<dyn RoomAuthority>,
    store: Arc<dyn MessageStore>,
    config: RealtimeConfig,
}

impl MessageGateway {
    /// Creates a new `MessageGateway`.
    #[must_use]
    pub fn new(
        registry: Arc<RoomRegistry>,
        authority: Arc<dyn RoomAuthority>,
        store: Arc<dyn MessageStore>,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            registry,
            authority,
            store,
            config,
        }
    }

    /// Returns a reference to the inner [`RoomRegistry`].
    #[must_use]
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Returns the real-time configuration.
    #[must_use]
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Checks that `user_id` may access `room_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Unauthorized`], [`AdmissionError::RoomNotFound`]
    /// or, if the membership source fails, [`AdmissionError::Authority`].
    pub async fn authorize(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), AdmissionError> {
        let access = self
            .authority
            .check_access(user_id, room_id)
            .await
            .map_err(|e| AdmissionError::Authority(e.to_string()))?;
        match access {
            RoomAccess::Granted => Ok(()),
            RoomAccess::Denied => Err(AdmissionError::Unauthorized(room_id.clone())),
            RoomAccess::UnknownRoom => Err(AdmissionError::RoomNotFound(room_id.clone())),
        }
    }

    /// Admits `user_id` into `room_id`.
    ///
    /// The returned session is `Active` and joined. On any failure the
    /// session is closed without ever becoming `Active`.
    ///
    /// # Errors
    ///
    /// Returns an [`AdmissionError`] if authorization fails, the room is
    /// full or the registry is shutting down.
    pub async fn admit(&self, user_id: UserId, room_id: RoomId) -> Result<Admission, AdmissionError> {
        if let Err(e) = self.authorize(&user_id, &room_id).await {
            tracing::info!(%user_id, %room_id, error = %e, "admission refused");
            return Err(e);
        }

        let (session, outbound) =
            SessionHandle::new(room_id.clone(), user_id, self.config.outbound_queue_depth);

        let joined = match self.registry.get_or_create(&room_id).await {
            Ok(reservation) => reservation.join(session.clone()).await,
            Err(e) => Err(e),
        };
        let room = match joined {
            Ok(room) => room,
            Err(e) => {
                session.close(CloseReason::AdmissionFailed);
                self.registry.schedule_retire(room_id.clone());
                tracing::info!(
                    user_id = %session.user_id(),
                    %room_id,
                    error = %e,
                    "room registration failed"
                );
                return Err(e);
            }
        };

        if let Err(e) = room.activate(&session).await {
            self.release(&room, &session, CloseReason::AdmissionFailed).await;
            tracing::warn!(
                user_id = %session.user_id(),
                %room_id,
                error = %e,
                "session activation failed"
            );
            return Err(AdmissionError::Unavailable(room_id));
        }
        self.spawn_drain_watchdog(Arc::clone(&room), session.clone());

        tracing::info!(
            user_id = %session.user_id(),
            %room_id,
            connection_id = %session.connection_id(),
            "session admitted"
        );

        Ok(Admission {
            session,
            outbound,
            room,
        })
    }

    /// Returns up to `limit` messages of `room_id` after `since_seq`.
    ///
    /// `limit` defaults to, and is capped at, the configured page limit.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the store fails.
    pub async fn history(
        &self,
        room_id: &RoomId,
        since_seq: u64,
        limit: Option<u32>,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        let cap = self.config.history_page_limit.max(1);
        let limit = limit.unwrap_or(cap).clamp(1, cap);
        self.store.fetch_history(room_id, since_seq, limit).await
    }

    /// Creates a room whose members are `creator` plus `members`.
    ///
    /// A random room ID is assigned when `room_id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::RoomAlreadyExists`] if `room_id` is taken, or
    /// the authority's error if the room cannot be recorded.
    pub async fn create_room(
        &self,
        creator: UserId,
        room_id: Option<RoomId>,
        listing_id: Option<String>,
        members: Vec<UserId>,
    ) -> Result<RoomSummary, GatewayError> {
        let room_id = match room_id {
            Some(id) => id,
            None => RoomId::parse(&uuid::Uuid::new_v4().to_string())?,
        };
        let mut seen = HashSet::new();
        let members: Vec<UserId> = std::iter::once(creator)
            .chain(members)
            .filter(|m| seen.insert(m.clone()))
            .collect();

        let summary = self
            .authority
            .create_room(&NewRoom {
                room_id,
                listing_id,
                members,
            })
            .await?;
        tracing::info!(
            room_id = %summary.room_id,
            members = summary.members.len(),
            "room created"
        );
        Ok(summary)
    }

    /// Lists the rooms `user_id` belongs to.
    ///
    /// # Errors
    ///
    /// Returns the authority's error if memberships cannot be read.
    pub async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<RoomSummary>, GatewayError> {
        self.authority.rooms_for(user_id).await
    }

    /// Closes `session` and removes it from `room`. Idempotent.
    pub async fn release(&self, room: &Room, session: &SessionHandle, reason: CloseReason) {
        session.close(reason);
        self.registry.release(room, session.connection_id()).await;
    }

    /// Closes a `Draining` session once the drain grace elapses, and
    /// removes the session from its room whenever it closes.
    fn spawn_drain_watchdog(&self, room: Arc<Room>, session: SessionHandle) {
        let registry = Arc::clone(&self.registry);
        let grace = self.config.drain_grace;
        tokio::spawn(async move {
            let mut state = session.subscribe_state();
            let reached = state
                .wait_for(|s| matches!(s, SessionState::Draining | SessionState::Closed))
                .await
                .map(|s| *s);

            if matches!(reached, Ok(SessionState::Draining)) {
                tokio::select! {
                    () = tokio::time::sleep(grace) => {
                        let reason = session.close_reason().unwrap_or(CloseReason::SlowConsumer);
                        if session.close(reason) {
                            tracing::info!(
                                connection_id = %session.connection_id(),
                                room_id = %session.room_id(),
                                reason = reason.as_str(),
                                "draining session closed"
                            );
                        }
                    }
                    () = session.closed() => {}
                }
            }

            registry.release(&room, session.connection_id()).await;
        });
    }
}
