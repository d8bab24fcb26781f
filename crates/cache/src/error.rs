//! Cache error types.

use thiserror::Error;

/// Cache operation errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("artifact exceeds {limit} bytes: {key}")]
    TooLarge { key: String, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Disk full, permission denied and similar faults that retrying elsewhere
    /// cannot fix.
    pub fn is_local_fault(&self) -> bool {
        matches!(self, CacheError::Io(_))
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
