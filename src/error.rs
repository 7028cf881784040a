//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for HTTP-facing code and the
//! storage/membership collaborators. [`AdmissionError`] and [`PublishError`]
//! are the narrower failures of the room subsystem; admission errors convert
//! into [`GatewayError`] so they can be returned before a WebSocket upgrade.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::RoomId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "room not found: listing-42",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 401 / 403 | Authentication  | 401 / 403                    |
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server          | 500 / 503                    |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing, malformed or expired credential.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated user may not access the room.
    #[error("not authorized for room {0}")]
    Forbidden(RoomId),

    /// Room identifier does not resolve.
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// Room reached its participant limit.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// A room with this identifier already exists.
    #[error("room already exists: {0}")]
    RoomAlreadyExists(RoomId),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Service is shutting down or a collaborator is unreachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Unauthenticated(_) => 401,
            Self::Forbidden(_) => 403,
            Self::InvalidRequest(_) => 1001,
            Self::RoomNotFound(_) => 2001,
            Self::RoomFull(_) => 2002,
            Self::RoomAlreadyExists(_) => 2005,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::Unavailable(_) => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::RoomNotFound(_) => StatusCode::NOT_FOUND,
            Self::RoomFull(_) | Self::RoomAlreadyExists(_) => StatusCode::CONFLICT,
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Why a connection could not be admitted into a room.
///
/// Produced before the session ever reaches the `Active` state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// The user is not a member of the room.
    #[error("user is not authorized for room {0}")]
    Unauthorized(RoomId),

    /// The room identifier does not resolve.
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// The room reached `max_participants_per_room`.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// The registry or room is shutting down.
    #[error("room {0} is not accepting connections")]
    Unavailable(RoomId),

    /// The membership collaborator failed.
    #[error("membership check failed: {0}")]
    Authority(String),
}

impl From<AdmissionError> for GatewayError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Unauthorized(room) => Self::Forbidden(room),
            AdmissionError::RoomNotFound(room) => Self::RoomNotFound(room),
            AdmissionError::RoomFull(room) => Self::RoomFull(room),
            AdmissionError::Unavailable(room) => {
                Self::Unavailable(format!("room {room} is not accepting connections"))
            }
            AdmissionError::Authority(msg) => Self::Unavailable(msg),
        }
    }
}

/// Why a publish attempt was rejected.
///
/// Reported only to the originating session. The sequence counter is never
/// advanced when a publish fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The message store rejected the write; nothing was broadcast.
    #[error("message could not be persisted: {0}")]
    Persistence(String),

    /// The room was retired or the server is shutting down.
    #[error("room is closed")]
    RoomClosed,

    /// The sender is not an active member of the room.
    #[error("session is not active in this room")]
    NotActive,
}

impl PublishError {
    /// Returns the numeric error code reported in WebSocket error frames.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::RoomClosed => 2003,
            Self::NotActive => 2004,
            Self::Persistence(_) => 3001,
        }
    }
}
