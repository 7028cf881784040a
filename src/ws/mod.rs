//! WebSocket layer: upgrade, connection driver, wire messages.
//!
//! The endpoint at `/ws?room_id=<id>` admits the caller into one room and
//! then carries JSON frames both ways: client commands in, room events and
//! command replies out.

pub mod connection;
pub mod handler;
pub mod messages;
