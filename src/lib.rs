//! # room-gateway
//!
//! Real-time room messaging for a listings marketplace. Buyers and sellers
//! connect over WebSocket, join a conversation room, and exchange messages
//! that every member receives in the same order.
//!
//! Each room assigns a gap-free sequence number to every accepted message,
//! persists it, and only then fans it out. Slow consumers never block a
//! room: their bounded outbound queue overflows, the message is dropped for
//! them and their session is drained and closed (drop-and-mark).
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── WS Handler / connection driver (ws/)
//!     ├── REST Handlers (api/)
//!     │
//!     ├── MessageGateway (service/)  ── RoomAuthority (auth/)
//!     │
//!     ├── RoomRegistry → Room → SessionHandle (domain/)
//!     │
//!     └── MessageStore: PostgreSQL or in-memory (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod ws;
