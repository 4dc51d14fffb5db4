use axum::{
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::ws::ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        // WebSocket endpoint for real-time events
        .route("/ws", any(ws_handler))
        // Gadget personality
        .route("/gadget/status", get(handlers::gadget_status))
        .route("/gadget/mode", post(handlers::gadget_set_mode))
        // Capture
        .route("/capture/status", get(handlers::capture_status))
        .route("/capture/sessions", get(handlers::capture_sessions))
        // Backing store
        .route("/storage/status", get(handlers::storage_status))
        .route("/storage/sync", post(handlers::storage_sync))
        // Keystroke injection
        .route("/hid/payloads", get(handlers::hid_payloads))
        .route("/hid/payloads/rescan", post(handlers::hid_rescan))
        .route("/hid/payloads/:name/execute", post(handlers::hid_execute))
        .route("/hid/type", post(handlers::hid_type))
        .route("/hid/execution", get(handlers::hid_execution))
        .route("/config", get(handlers::get_config));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
