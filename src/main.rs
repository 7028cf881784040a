//! room-gateway server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use room_gateway::api;
use room_gateway::app_state::AppState;
use room_gateway::auth::{InMemoryRoomAuthority, JwtVerifier, PostgresRoomAuthority, RoomAuthority};
use room_gateway::config::{GatewayConfig, LogFormat};
use room_gateway::domain::RoomRegistry;
use room_gateway::persistence::{InMemoryMessageStore, MessageStore, PostgresMessageStore};
use room_gateway::service::MessageGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env().context("loading configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting room-gateway");

    // Build persistence and membership
    let (store, authority): (Arc<dyn MessageStore>, Arc<dyn RoomAuthority>) =
        if config.persistence_enabled {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .min_connections(config.database_min_connections)
                .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
                .connect(&config.database_url)
                .await
                .context("connecting to PostgreSQL")?;
            if config.database_run_migrations {
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .context("running migrations")?;
                tracing::info!("database migrations applied");
            }
            let store: Arc<dyn MessageStore> = Arc::new(PostgresMessageStore::new(pool.clone()));
            let authority: Arc<dyn RoomAuthority> = Arc::new(PostgresRoomAuthority::new(pool));
            (store, authority)
        } else {
            tracing::warn!("persistence disabled: in-memory store, every room open");
            let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
            let authority: Arc<dyn RoomAuthority> = Arc::new(InMemoryRoomAuthority::open());
            (store, authority)
        };

    // Build domain and service layers
    let registry = Arc::new(RoomRegistry::new(
        Arc::clone(&store),
        config.realtime.room_limits(),
        config.realtime.room_retire_grace,
    ));
    let gateway = Arc::new(MessageGateway::new(
        Arc::clone(&registry),
        authority,
        store,
        config.realtime.clone(),
    ));

    // Build application state and router
    let app_state = AppState {
        gateway,
        jwt: Arc::new(JwtVerifier::new(&config.jwt_secret)),
    };
    let app = api::build_app(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    let closed = registry.shutdown().await;
    tracing::info!(sessions = closed, "room-gateway stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
