//! Type-safe identifiers for rooms, users and connections.
//!
//! Room and user identifiers are assigned outside this service (listing or
//! conversation keys, JWT subjects) so they wrap validated strings.
//! [`ConnectionId`] is generated here, one per admitted session.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::GatewayError;

/// Longest accepted room or user identifier, in bytes.
pub const MAX_ID_LEN: usize = 128;

fn validate_id(kind: &str, raw: &str) -> Result<(), GatewayError> {
    if raw.is_empty() {
        return Err(GatewayError::InvalidRequest(format!("{kind} must not be empty")));
    }
    if raw.len() > MAX_ID_LEN {
        return Err(GatewayError::InvalidRequest(format!(
            "{kind} exceeds {MAX_ID_LEN} bytes"
        )));
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(GatewayError::InvalidRequest(format!(
            "{kind} contains invalid characters"
        )));
    }
    Ok(())
}

/// Identifier of a chat room.
///
/// Externally assigned (a listing or conversation key). Used as the key in
/// [`super::RoomRegistry`] and as the partition key of stored messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Parses and validates a room identifier.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if the identifier is empty,
    /// longer than [`MAX_ID_LEN`] or contains characters outside
    /// `[A-Za-z0-9_.:-]`.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        validate_id("room id", raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an authenticated user (the JWT `sub` claim).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Parses and validates a user identifier.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] under the same rules as
    /// [`RoomId::parse`].
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        validate_id("user id", raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for one admitted connection.
///
/// Wraps a UUID v4 generated at admission time. Two sessions of the same
/// user in the same room have distinct connection IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Creates a new random `ConnectionId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn room_id_accepts_listing_keys() {
        let Ok(id) = RoomId::parse("listing:42_buyer-7.a") else {
            panic!("valid room id rejected");
        };
        assert_eq!(id.as_str(), "listing:42_buyer-7.a");
        assert_eq!(id.to_string(), "listing:42_buyer-7.a");
    }

    #[test]
    fn room_id_rejects_empty_and_oversized() {
        assert!(RoomId::parse("").is_err());
        assert!(RoomId::parse(&"r".repeat(MAX_ID_LEN + 1)).is_err());
        assert!(RoomId::parse(&"r".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn room_id_rejects_whitespace_and_slashes() {
        assert!(RoomId::parse("room one").is_err());
        assert!(RoomId::parse("rooms/1").is_err());
    }

    #[test]
    fn user_id_serializes_transparently() {
        let Ok(id) = UserId::parse("user-1") else {
            panic!("valid user id rejected");
        };
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"user-1\"");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
        assert_eq!(ConnectionId::new().to_string().len(), 36);
    }
}
