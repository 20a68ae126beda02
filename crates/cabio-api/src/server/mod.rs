//! Server state, router wiring, and the serve loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use cabio_bridge::{IngestionQueues, SessionRegistry};
use cabio_storage::Stores;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenKeys;
use crate::handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ServerState {
    pub stores: Arc<Stores>,
    pub registry: Arc<SessionRegistry>,
    pub queues: IngestionQueues,
    pub tokens: TokenKeys,
}

impl ServerState {
    pub fn new(
        stores: Arc<Stores>,
        registry: Arc<SessionRegistry>,
        queues: IngestionQueues,
        tokens: TokenKeys,
    ) -> Self {
        Self {
            stores,
            registry,
            queues,
            tokens,
        }
    }
}

/// Build the API router.
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        // Auth
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/refresh", post(handlers::auth::refresh))
        .route("/api/auth/account", delete(handlers::auth::delete_account))
        // Broker connection lifecycle
        .route(
            "/api/connection/disconnect",
            post(handlers::connection::disconnect),
        )
        .route(
            "/api/connection/reconnect",
            post(handlers::connection::reconnect),
        )
        .route("/api/connection/status", get(handlers::connection::status))
        // Cabinets
        .route(
            "/api/cabinets",
            get(handlers::cabinets::list).post(handlers::cabinets::create),
        )
        .route(
            "/api/cabinets/:cabinet_id",
            get(handlers::cabinets::get)
                .patch(handlers::cabinets::update)
                .delete(handlers::cabinets::delete),
        )
        .route(
            "/api/cabinets/:cabinet_id/overview",
            get(handlers::cabinets::overview),
        )
        // Relays
        .route(
            "/api/cabinets/:cabinet_id/relays",
            get(handlers::relays::list).post(handlers::relays::add),
        )
        .route(
            "/api/cabinets/:cabinet_id/relays/home",
            get(handlers::relays::list_home),
        )
        .route(
            "/api/cabinets/:cabinet_id/relays/set",
            patch(handlers::relays::update),
        )
        .route(
            "/api/cabinets/:cabinet_id/relays/set-status",
            patch(handlers::relays::set_status),
        )
        .route(
            "/api/cabinets/:cabinet_id/relays/set-home",
            patch(handlers::relays::set_home),
        )
        .route(
            "/api/cabinets/:cabinet_id/relays/:relay_id",
            delete(handlers::relays::delete),
        )
        // Schedules
        .route(
            "/api/cabinets/:cabinet_id/schedules",
            get(handlers::schedules::list).post(handlers::schedules::add),
        )
        .route(
            "/api/cabinets/:cabinet_id/schedules/today",
            get(handlers::schedules::list_today),
        )
        .route(
            "/api/cabinets/:cabinet_id/schedules/:schedule_id",
            patch(handlers::schedules::update).delete(handlers::schedules::delete),
        )
        .route(
            "/api/cabinets/:cabinet_id/schedules/:schedule_id/set-status",
            patch(handlers::schedules::set_status),
        )
        // Sensors
        .route(
            "/api/cabinets/:cabinet_id/sensors/:kind",
            get(handlers::sensors::latest).post(handlers::sensors::insert),
        )
        .route(
            "/api/cabinets/:cabinet_id/sensors/:kind/history",
            get(handlers::sensors::history),
        )
        // Logs and boards
        .route("/api/cabinets/:cabinet_id/logs", get(handlers::logs::list))
        .route(
            "/api/cabinets/:cabinet_id/boards",
            get(handlers::logs::boards),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: ServerState, addr: SocketAddr) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP API listening");
    axum::serve(listener, app).await
}
