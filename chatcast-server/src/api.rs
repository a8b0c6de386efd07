//! API routes definition

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Chat socket
        .route("/ws", get(handlers::ws_upgrade))
        // Read-only HTTP surface
        .route("/health", get(handlers::health))
        .route("/api/messages", get(handlers::list_messages))
        .fallback(handlers::not_found)
        .with_state(state)
}
