//! WebSocket message types: envelope, commands, and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChatMessage, ConnectionId, RoomId, UserId};

/// Error code for frames that are not valid JSON or name no known command.
pub const CODE_MALFORMED_FRAME: u32 = 1001;
/// Error code for an empty or oversized message body.
pub const CODE_INVALID_BODY: u32 = 1002;
/// Error code for binary frames.
pub const CODE_UNSUPPORTED_FRAME: u32 = 1003;

/// Top-level server → client envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Echo of the client request ID for responses and errors;
    /// server-generated for events.
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp.
    pub timestamp: DateTime<Utc>,
    /// Variant-specific payload.
    pub payload: serde_json::Value,
}

/// Discriminator for server → client frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Reply to a client command.
    Response,
    /// Room broadcast or lifecycle event.
    Event,
    /// Error addressed to this connection only.
    Error,
}

impl WsMessage {
    /// Builds a response to the request identified by `id`.
    #[must_use]
    pub fn response(id: String, payload: serde_json::Value) -> Self {
        Self {
            id,
            msg_type: WsMessageType::Response,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Builds an event frame with a fresh ID.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the event cannot be serialized.
    pub fn event(event: &WsEvent<'_>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            msg_type: WsMessageType::Event,
            timestamp: Utc::now(),
            payload: serde_json::to_value(event)?,
        })
    }

    /// Builds an error frame.
    #[must_use]
    pub fn error(id: String, code: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            msg_type: WsMessageType::Error,
            timestamp: Utc::now(),
            payload: serde_json::json!({
                "code": code,
                "message": message.into(),
            }),
        }
    }

    /// Serializes the frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the payload cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Events pushed to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WsEvent<'a> {
    /// Sent once after admission.
    Joined {
        /// Joined room.
        room_id: &'a RoomId,
        /// Authenticated user.
        user_id: &'a UserId,
        /// Server-assigned connection ID.
        connection_id: ConnectionId,
        /// Highest sequence number accepted by the room so far.
        last_seq: u64,
    },
    /// A message accepted by the room.
    Message(&'a ChatMessage),
}

/// A client → server frame.
#[derive(Debug, Clone, Deserialize)]
pub struct WsRequest {
    /// Client-chosen request ID, echoed in the reply.
    #[serde(default)]
    pub id: String,
    /// The command.
    #[serde(flatten)]
    pub command: WsCommand,
}

/// Commands that a client can send over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WsCommand {
    /// Publish a message to the joined room.
    Publish {
        /// Message body.
        body: String,
    },
    /// Fetch messages after `since_seq` (reconnect resynchronization).
    History {
        /// Exclusive lower bound.
        #[serde(default)]
        since_seq: u64,
        /// Page size, capped by the server.
        #[serde(default)]
        limit: Option<u32>,
    },
    /// Liveness check.
    Ping,
}

/// Why an inbound frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameError {
    /// Request ID, when one could be read.
    pub id: String,
    /// Numeric error code.
    pub code: u32,
    /// Human-readable reason.
    pub message: String,
}

impl FrameError {
    /// Converts the rejection into an error frame.
    #[must_use]
    pub fn into_message(self) -> WsMessage {
        WsMessage::error(self.id, self.code, self.message)
    }
}

/// Parses a text frame into a request.
///
/// # Errors
///
/// Returns a [`FrameError`] for invalid JSON or an unknown command. The
/// request ID is preserved whenever the frame was a JSON object.
pub fn parse_request(text: &str) -> Result<WsRequest, FrameError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| FrameError {
        id: String::new(),
        code: CODE_MALFORMED_FRAME,
        message: format!("malformed JSON: {e}"),
    })?;
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    serde_json::from_value(value).map_err(|e| FrameError {
        id,
        code: CODE_MALFORMED_FRAME,
        message: format!("invalid command: {e}"),
    })
}

/// Checks a publish body against the size limit.
///
/// # Errors
///
/// Returns a [`FrameError`] when the body is blank or longer than
/// `max_bytes`.
pub fn validate_body(id: &str, body: &str, max_bytes: usize) -> Result<(), FrameError> {
    let message = if body.trim().is_empty() {
        "message body must not be empty".to_string()
    } else if body.len() > max_bytes {
        format!("message body exceeds {max_bytes} bytes")
    } else {
        return Ok(());
    };
    Err(FrameError {
        id: id.to_string(),
        code: CODE_INVALID_BODY,
        message,
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::domain::session::tests::ids;

    #[test]
    fn parses_each_command() {
        let Ok(req) = parse_request(r#"{"id":"1","command":"publish","body":"hi"}"#) else {
            panic!("publish should parse");
        };
        assert_eq!(req.id, "1");
        assert_eq!(
            req.command,
            WsCommand::Publish {
                body: "hi".to_string()
            }
        );

        let Ok(req) = parse_request(r#"{"command":"history","since_seq":4}"#) else {
            panic!("history should parse");
        };
        assert_eq!(req.id, "");
        assert_eq!(
            req.command,
            WsCommand::History {
                since_seq: 4,
                limit: None
            }
        );

        let Ok(req) = parse_request(r#"{"id":"p","command":"ping"}"#) else {
            panic!("ping should parse");
        };
        assert_eq!(req.command, WsCommand::Ping);
    }

    #[test]
    fn rejects_bad_json_and_unknown_commands() {
        let Err(err) = parse_request("not json") else {
            panic!("should fail");
        };
        assert_eq!(err.code, CODE_MALFORMED_FRAME);
        assert!(err.id.is_empty());

        let Err(err) = parse_request(r#"{"id":"7","command":"dance"}"#) else {
            panic!("should fail");
        };
        assert_eq!(err.id, "7");
        assert_eq!(err.code, CODE_MALFORMED_FRAME);

        let Err(err) = parse_request(r#"{"id":"8","command":"publish"}"#) else {
            panic!("missing body should fail");
        };
        assert_eq!(err.id, "8");
    }

    #[test]
    fn body_validation() {
        assert!(validate_body("1", "hello", 8).is_ok());
        assert_eq!(
            validate_body("1", "   ", 8).map_err(|e| e.code),
            Err(CODE_INVALID_BODY)
        );
        assert_eq!(
            validate_body("1", "123456789", 8).map_err(|e| e.code),
            Err(CODE_INVALID_BODY)
        );
    }

    #[test]
    fn message_event_flattens_the_chat_message() {
        let (room_id, sender_id) = ids("R1", "alice");
        let message = ChatMessage {
            room_id,
            seq: 3,
            sender_id,
            body: "hello".to_string(),
            created_at: Utc::now(),
        };
        let Ok(frame) = WsMessage::event(&WsEvent::Message(&message)) else {
            panic!("serializable event");
        };
        assert_eq!(frame.msg_type, WsMessageType::Event);
        assert_eq!(frame.payload["event"], "message");
        assert_eq!(frame.payload["seq"], 3);
        assert_eq!(frame.payload["room_id"], "R1");
        assert_eq!(frame.payload["sender_id"], "alice");

        let Ok(json) = frame.to_json() else {
            panic!("serializable");
        };
        assert!(json.contains(r#""type":"event""#));
    }

    #[test]
    fn error_frame_shape() {
        let frame = WsMessage::error("9".to_string(), CODE_UNSUPPORTED_FRAME, "binary");
        assert_eq!(frame.id, "9");
        assert_eq!(frame.msg_type, WsMessageType::Error);
        assert_eq!(frame.payload["code"], CODE_UNSUPPORTED_FRAME);
        assert_eq!(frame.payload["message"], "binary");
    }

    #[test]
    fn joined_event_reports_connection_and_last_seq() {
        let (room_id, user_id) = ids("R1", "bob");
        let connection_id = ConnectionId::new();
        let Ok(frame) = WsMessage::event(&WsEvent::Joined {
            room_id: &room_id,
            user_id: &user_id,
            connection_id,
            last_seq: 12,
        }) else {
            panic!("serializable event");
        };
        assert_eq!(frame.payload["event"], "joined");
        assert_eq!(frame.payload["user_id"], "bob");
        assert_eq!(frame.payload["connection_id"], connection_id.to_string());
        assert_eq!(frame.payload["last_seq"], 12);
    }
}
