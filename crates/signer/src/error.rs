//! Signer error types.

use thiserror::Error;

/// Signing and verification errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("invalid signature format: {0}")]
    InvalidSignature(String),

    #[error("signature by untrusted key: {0}")]
    UntrustedKey(String),

    #[error("artifact is not signed")]
    MissingSignature,

    #[error("verification failed")]
    VerificationFailed,
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
