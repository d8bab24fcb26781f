//! HTTP control and data plane of the pkgmesh daemon.
//!
//! This crate provides:
//! - Liveness and status endpoints
//! - Peer announces, `have` queries and the peer list
//! - Artifact streaming from the local cache to peers
//! - Prometheus metrics

pub mod capabilities;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use capabilities::CatalogCapabilities;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
