//! API Router configuration

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let router = Router::new()
        .route("/ws", get(handlers::ws_upgrade))
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
