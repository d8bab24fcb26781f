//! Artifact download endpoint used by peers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use pkgmesh_cache::CacheError;
use pkgmesh_core::SafeRelativePath;
use tokio_util::io::ReaderStream;

/// GET /media/{*path} - Stream a cached artifact.
pub async fn get_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let key = SafeRelativePath::parse(&path)?;
    let artifact = match state.cache.open(&key).await {
        Ok(artifact) => artifact,
        Err(CacheError::NotFound(_)) => {
            return Err(ApiError::NotFound(format!("not cached: {key}")));
        }
        Err(e) => return Err(e.into()),
    };
    if let Err(e) = state.cache.touch(&key).await {
        tracing::debug!(key = %key, error = %e, "Failed to record cache access");
    }
    tracing::debug!(key = %key, size = artifact.size, "Serving artifact");

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_LENGTH, artifact.size.to_string()),
        ],
        Body::from_stream(ReaderStream::new(artifact.file)),
    )
        .into_response())
}
