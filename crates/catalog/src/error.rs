//! Catalog error types.

use thiserror::Error;

/// Catalog operation errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("path safety violation: {0}")]
    PathSafetyViolation(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<pkgmesh_core::Error> for CatalogError {
    fn from(err: pkgmesh_core::Error) -> Self {
        match err {
            pkgmesh_core::Error::PathSafety(msg) => Self::PathSafetyViolation(msg),
            other => Self::InvalidIdentity(other.to_string()),
        }
    }
}

/// Result type for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_path_error_maps_to_path_safety() {
        let err: CatalogError = pkgmesh_core::Error::PathSafety("../x".to_string()).into();
        assert!(matches!(err, CatalogError::PathSafetyViolation(_)));

        let err: CatalogError = pkgmesh_core::Error::InvalidIdentity("x".to_string()).into();
        assert!(matches!(err, CatalogError::InvalidIdentity(_)));
    }
}
