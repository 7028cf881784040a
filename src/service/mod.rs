//! Service layer: admission and orchestration of the room subsystem.
//!
//! The [`MessageGateway`] sits between the transport (WebSocket, REST) and
//! the domain layer. It checks membership, admits sessions into rooms and
//! relays history queries to the message store.

pub mod message_gateway;

pub use message_gateway::{Admission, MessageGateway};
