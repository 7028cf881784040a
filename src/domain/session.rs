//! Per-connection session: state machine and bounded outbound queue.
//!
//! A [`SessionHandle`] is the server-side view of one admitted connection.
//! The room holds a clone of it to deliver broadcasts; the transport driver
//! holds another to run the read/write loops. State lives in a
//! [`tokio::sync::watch`] channel so every task observes transitions, and
//! the outbound queue is a bounded [`tokio::sync::mpsc`] channel drained by
//! the write task.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use utoipa::ToSchema;

use super::{ChatMessage, ConnectionId, RoomId, UserId};

/// Lifecycle state of a session.
///
/// `Connecting → Active → Draining → Closed`. `Closed` is terminal and
/// reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Admitted but not yet registered with its room.
    Connecting,
    /// Registered; receives broadcasts and may publish.
    Active,
    /// Scheduled for closing; no longer receives broadcasts.
    Draining,
    /// Terminal.
    Closed,
}

/// Why a session left the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The client closed the connection.
    ClientClosed,
    /// The outbound queue overflowed (drop-and-mark).
    SlowConsumer,
    /// No inbound frame within the idle timeout.
    IdleTimeout,
    /// Too many malformed frames.
    ProtocolViolation,
    /// Reading from or writing to the transport failed.
    TransportError,
    /// Registration with the room failed.
    AdmissionFailed,
    /// The room was retired.
    RoomRetired,
    /// The server is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// Returns the reason as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::SlowConsumer => "slow_consumer",
            Self::IdleTimeout => "idle_timeout",
            Self::ProtocolViolation => "protocol_violation",
            Self::TransportError => "transport_error",
            Self::AdmissionFailed => "admission_failed",
            Self::RoomRetired => "room_retired",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

/// An item waiting in a session's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Admission confirmation; always the first item of a session's queue.
    Joined {
        /// Highest sequence number accepted by the room at activation.
        last_seq: u64,
    },
    /// A room broadcast, shared by every recipient.
    Message(Arc<ChatMessage>),
    /// A pre-serialized frame addressed to this session only.
    Text(String),
}

/// Result of a non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The item was queued.
    Queued,
    /// The queue was full; the item was dropped and the session marked
    /// `Draining`.
    Full,
    /// The consumer is gone; the session was closed.
    Closed,
}

#[derive(Debug)]
struct SessionShared {
    connection_id: ConnectionId,
    user_id: UserId,
    room_id: RoomId,
    state: watch::Sender<SessionState>,
    close_reason: OnceLock<CloseReason>,
    last_activity_ms: AtomicI64,
    outbound: mpsc::Sender<Outbound>,
}

/// Cloneable handle to one connection's session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl SessionHandle {
    /// Creates a session in state `Connecting` and returns it together with
    /// the receiving end of its outbound queue.
    ///
    /// A `queue_depth` of zero is treated as one.
    #[must_use]
    pub fn new(
        room_id: RoomId,
        user_id: UserId,
        queue_depth: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(queue_depth.max(1));
        let (state, _) = watch::channel(SessionState::Connecting);
        let handle = Self {
            inner: Arc::new(SessionShared {
                connection_id: ConnectionId::new(),
                user_id,
                room_id,
                state,
                close_reason: OnceLock::new(),
                last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
                outbound,
            }),
        };
        (handle, rx)
    }

    /// Returns the connection identifier.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection_id
    }

    /// Returns the authenticated user of this connection.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// Returns the room this session was admitted to.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Returns a receiver that observes every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Returns the reason recorded when the session left `Active`, if any.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.get().copied()
    }

    /// `Connecting → Active`. Returns `false` from any other state.
    pub fn activate(&self) -> bool {
        self.transition(|s| s == SessionState::Connecting, SessionState::Active)
    }

    /// `Active → Draining`. Returns `false` from any other state.
    pub fn mark_draining(&self, reason: CloseReason) -> bool {
        if self.state() != SessionState::Active {
            return false;
        }
        let _ = self.inner.close_reason.set(reason);
        self.transition(|s| s == SessionState::Active, SessionState::Draining)
    }

    /// Any state `→ Closed`. Returns `false` if already closed.
    ///
    /// The first recorded reason wins, so a session drained for
    /// [`CloseReason::SlowConsumer`] keeps that reason when the watchdog
    /// closes it.
    pub fn close(&self, reason: CloseReason) -> bool {
        let _ = self.inner.close_reason.set(reason);
        self.transition(|s| s != SessionState::Closed, SessionState::Closed)
    }

    /// Resolves once the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.subscribe_state();
        let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Records inbound activity.
    pub fn touch(&self) {
        self.inner
            .last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Returns the time of the last inbound frame (or of admission).
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        let ms = self.inner.last_activity_ms.load(Ordering::Relaxed);
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    /// Queues an item without waiting.
    ///
    /// On overflow the item is dropped and the session is marked `Draining`
    /// (drop-and-mark); the caller is never blocked by a slow consumer.
    pub fn deliver(&self, item: Outbound) -> Delivery {
        match self.inner.outbound.try_send(item) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                if self.mark_draining(CloseReason::SlowConsumer) {
                    tracing::warn!(
                        connection_id = %self.inner.connection_id,
                        room_id = %self.inner.room_id,
                        "outbound queue full, session marked draining"
                    );
                }
                Delivery::Full
            }
            Err(TrySendError::Closed(_)) => {
                self.close(CloseReason::TransportError);
                Delivery::Closed
            }
        }
    }

    fn transition(&self, allowed: impl FnOnce(SessionState) -> bool, next: SessionState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if allowed(*state) {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}
