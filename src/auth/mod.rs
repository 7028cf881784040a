//! Authentication and room membership.
//!
//! Identity comes from a JWT verified by [`JwtVerifier`]; whether that
//! identity may join a room is answered by a [`RoomAuthority`].

pub mod authority;
pub mod jwt;

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::domain::UserId;
use crate::error::GatewayError;

pub use authority::{
    InMemoryRoomAuthority, NewRoom, PostgresRoomAuthority, RoomAccess, RoomAuthority, RoomSummary,
};
pub use jwt::{Claims, JwtVerifier};

/// Authenticated caller of an HTTP or WebSocket endpoint.
///
/// The token is read from `Authorization: Bearer <token>` or, when that
/// header is absent, from the `token` query parameter (browsers cannot set
/// headers on a WebSocket upgrade).
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(parts: &Parts) -> Result<Option<String>, GatewayError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = header
        .to_str()
        .map_err(|_| GatewayError::Unauthenticated("invalid Authorization header".to_string()))?;
    let token = value.strip_prefix("Bearer ").ok_or_else(|| {
        GatewayError::Unauthenticated("Authorization must use Bearer scheme".to_string())
    })?;
    Ok(Some(token.trim().to_string()))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = match bearer_token(parts)? {
            Some(token) => token,
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token)
                .ok_or_else(|| GatewayError::Unauthenticated("missing credentials".to_string()))?,
        };
        state.jwt.verify(&token).map(AuthUser)
    }
}
