//! Liveness and status endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use time::OffsetDateTime;

/// GET /ping
pub async fn ping() -> StatusCode {
    StatusCode::OK
}

/// Daemon state summary.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    pub uptime_seconds: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
    pub state_dir: String,
    pub cache_root: String,
    pub host: String,
    pub port: u16,
    pub node_id: String,
    /// Live (non-expired) peers.
    pub peers: usize,
    pub workers: usize,
    pub in_flight: usize,
    pub version: &'static str,
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let config = &state.config;
    let state_dir = config
        .catalog
        .path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    Ok(Json(StatusResponse {
        running: true,
        start_time: state.start_time,
        uptime_seconds: (OffsetDateTime::now_utc() - state.start_time).whole_seconds(),
        last_refresh: state.replication.last_refresh().await,
        state_dir,
        cache_root: state.cache.root().display().to_string(),
        host: config.server.host.clone(),
        port: config.server.port,
        node_id: state.peers.node_id().to_string(),
        peers: state.peers.live_count().await,
        workers: state.coordinator.workers(),
        in_flight: state.coordinator.in_flight(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}
