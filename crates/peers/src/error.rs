//! Peer error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Peer directory, discovery and peer client errors.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer is blacklisted: {0}")]
    Blacklisted(SocketAddr),

    #[error("unknown peer: {0}")]
    UnknownPeer(SocketAddr),

    #[error("invalid announce: {0}")]
    InvalidAnnounce(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("peer {peer} answered {status}")]
    Status { peer: SocketAddr, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for peer operations.
pub type PeerResult<T> = std::result::Result<T, PeerError>;
