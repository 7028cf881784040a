//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::auth::JwtVerifier;
use crate::service::MessageGateway;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Admission, rooms and history.
    pub gateway: Arc<MessageGateway>,
    /// Access token verification.
    pub jwt: Arc<JwtVerifier>,
}
