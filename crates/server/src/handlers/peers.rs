//! Peer-facing endpoints: peer list, announces and availability queries.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{ConnectInfo, State};
use pkgmesh_core::SafeRelativePath;
use pkgmesh_peers::{
    Announce, AnnounceAck, AnnounceOutcome, HaveEntry, HaveRequest, HaveResponse, PeerRecord,
};
use std::net::SocketAddr;

/// GET /api/peers
pub async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerRecord>> {
    Json(state.peers.records().await)
}

/// POST /api/announce
///
/// The peer's host is the connection source; its HTTP port comes from the
/// payload.
pub async fn announce(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(payload): Json<Announce>,
) -> ApiResult<Json<AnnounceAck>> {
    payload.validate().map_err(ApiError::BadRequest)?;
    let address = SocketAddr::new(remote.ip(), payload.port);
    let outcome = state.peers.announce(address, &payload).await;
    if outcome == AnnounceOutcome::New {
        tracing::info!(peer = %address, node_id = %payload.node_id, "Peer announced over HTTP");
    }
    Ok(Json(AnnounceAck {
        status: "ok".to_string(),
        known: outcome == AnnounceOutcome::Refreshed,
    }))
}

/// POST /api/have
pub async fn have(
    State(state): State<AppState>,
    Json(request): Json<HaveRequest>,
) -> ApiResult<Json<HaveResponse>> {
    match request {
        HaveRequest::Single { key } => {
            let key = SafeRelativePath::parse(&key)?;
            let size = state.cache.stat(&key).await?.map(|entry| entry.size);
            Ok(Json(HaveResponse::Single {
                available: size.is_some(),
                size,
            }))
        }
        HaveRequest::Batch { keys } => {
            let mut available = Vec::new();
            let mut missing = Vec::new();
            for key in keys {
                let entry = match SafeRelativePath::parse(&key) {
                    Ok(parsed) => state.cache.stat(&parsed).await?,
                    Err(_) => None,
                };
                match entry {
                    Some(entry) => available.push(HaveEntry {
                        key,
                        size: entry.size,
                    }),
                    None => missing.push(key),
                }
            }
            Ok(Json(HaveResponse::Batch {
                available_count: available.len(),
                missing_count: missing.len(),
                available,
                missing,
            }))
        }
    }
}
