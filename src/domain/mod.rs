//! Domain layer: identifiers, sessions, rooms and the room registry.
//!
//! This module contains the real-time core: the per-connection session
//! state machine, the room that orders, persists and fans out messages,
//! and the registry that manages room lifecycles.

pub mod ids;
pub mod message;
pub mod room;
pub mod room_registry;
pub mod session;

pub use ids::{ConnectionId, RoomId, UserId};
pub use message::ChatMessage;
pub use room::{ParticipantInfo, Room, RoomLimits};
pub use room_registry::{RegistryStats, RoomRegistry, RoomReservation};
pub use session::{CloseReason, Delivery, Outbound, SessionHandle, SessionState};
