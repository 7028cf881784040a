//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` and the
//! WebSocket endpoint `/ws` live at the root.

pub mod dto;
pub mod handlers;

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Upper bound on REST request handling. Not applied to `/ws`.
const REST_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAPI document of the REST endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "room-gateway",
        description = "Real-time room messaging: room, history and presence endpoints. Live traffic uses the WebSocket endpoint `/ws?room_id=<id>`."
    ),
    paths(
        handlers::system::health_handler,
        handlers::rooms::create_room,
        handlers::rooms::list_rooms,
        handlers::rooms::get_history,
        handlers::rooms::get_participants,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        crate::domain::ChatMessage,
        crate::domain::ParticipantInfo,
        crate::auth::RoomSummary,
        dto::CreateRoomRequest,
        dto::RoomListResponse,
        dto::HistoryResponse,
        dto::ParticipantsResponse,
        handlers::system::HealthResponse,
    )),
    tags(
        (name = "Rooms", description = "Rooms, history and participants"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

/// Builds the full application: REST, WebSocket, and (with the
/// `swagger-ui` feature) the Swagger UI at `/swagger-ui`.
pub fn build_app(state: AppState) -> Router {
    #[allow(deprecated)]
    let rest = build_router().layer(TimeoutLayer::new(REST_TIMEOUT));

    let router = Router::new().merge(rest).route("/ws", get(ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
