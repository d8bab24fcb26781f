//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let control_routes = Router::new()
        .route("/ping", get(handlers::ping))
        .route("/status", get(handlers::status));

    let peer_routes = Router::new()
        .route("/api/peers", get(handlers::list_peers))
        .route("/api/announce", post(handlers::announce))
        .route("/api/have", post(handlers::have))
        .route("/media/{*path}", get(handlers::get_media));

    let mut router = Router::new().merge(control_routes).merge(peer_routes);

    // /metrics is unauthenticated; keep it off untrusted networks.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
