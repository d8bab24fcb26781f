//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("unsafe path: {0}")]
    PathSafety(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
