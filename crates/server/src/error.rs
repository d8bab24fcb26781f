//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pkgmesh_cache::CacheError;
use pkgmesh_catalog::CatalogError;
use pkgmesh_fetch::{FailureKind, FetchError};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("invalid path: {0}")]
    Core(#[from] pkgmesh_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Catalog(CatalogError::NotFound(_)) => "not_found",
            Self::Catalog(CatalogError::Conflict(_)) => "conflict",
            Self::Catalog(CatalogError::PathSafetyViolation(_)) => "path_safety_violation",
            Self::Catalog(_) => "catalog_error",
            Self::Cache(CacheError::NotFound(_)) => "not_found",
            Self::Cache(CacheError::InvalidKey(_)) => "path_safety_violation",
            Self::Cache(_) => "cache_error",
            Self::Fetch(e) => match e {
                FetchError::NotFound(_) => "not_found",
                FetchError::SourceUnavailable(_) => "source_unavailable",
                FetchError::IntegrityFailure(_) => "integrity_failure",
                FetchError::PathSafetyViolation(_) => "path_safety_violation",
                FetchError::QuotaExceeded(_) => "quota_exceeded",
                FetchError::PeerUntrusted(_) => "peer_untrusted",
                FetchError::LocalResource(_) => "local_resource",
                FetchError::Cancelled => "cancelled",
                FetchError::Failed(failure) => match failure.kind {
                    FailureKind::Exhausted => "exhausted",
                    FailureKind::Untrustworthy => "untrustworthy",
                    FailureKind::Fatal => "local_resource",
                },
            },
            Self::Core(_) => "path_safety_violation",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Catalog(e) => match e {
                CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
                CatalogError::Conflict(_) => StatusCode::CONFLICT,
                CatalogError::PathSafetyViolation(_) | CatalogError::InvalidIdentity(_) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Cache(e) => match e {
                CacheError::NotFound(_) => StatusCode::NOT_FOUND,
                CacheError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Fetch(e) => match e {
                FetchError::NotFound(_) => StatusCode::NOT_FOUND,
                FetchError::PathSafetyViolation(_) => StatusCode::BAD_REQUEST,
                FetchError::PeerUntrusted(_) => StatusCode::FORBIDDEN,
                FetchError::QuotaExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
                FetchError::LocalResource(_) => StatusCode::INTERNAL_SERVER_ERROR,
                FetchError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                FetchError::SourceUnavailable(_)
                | FetchError::IntegrityFailure(_)
                | FetchError::Failed(_) => StatusCode::BAD_GATEWAY,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmesh_fetch::JobFailure;

    #[test]
    fn test_error_mapping() {
        let err = ApiError::from(CacheError::NotFound("custom/x/a.rpm".into()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "not_found");

        let err = ApiError::from(CatalogError::Conflict("extras".into()));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err = ApiError::from(FetchError::QuotaExceeded("9/x86_64/extras".into()));
        assert_eq!(err.status_code(), StatusCode::INSUFFICIENT_STORAGE);
        assert_eq!(err.code(), "quota_exceeded");

        let failure = JobFailure {
            artifact: "custom/extras/a.rpm".into(),
            kind: FailureKind::Untrustworthy,
            attempts: Vec::new(),
        };
        let err = ApiError::from(FetchError::Failed(failure));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "untrustworthy");
    }
}
