//! LAN peers for pkgmesh.
//!
//! This crate provides:
//! - [`PeerDirectory`]: the live peer table with TTL expiry and trust state
//! - A persisted blacklist that survives restarts
//! - UDP broadcast [`Discovery`]
//! - [`PeerClient`] for `have` probes, artifact downloads and announces

pub mod blacklist;
pub mod client;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod wire;

pub use blacklist::{BlacklistEntry, BlacklistStore};
pub use client::PeerClient;
pub use directory::{AnnounceOutcome, PeerCandidate, PeerDirectory};
pub use discovery::{CapabilitySource, Discovery, jittered};
pub use error::{PeerError, PeerResult};
pub use wire::{
    Announce, AnnounceAck, Capability, HaveEntry, HaveRequest, HaveResponse, PeerRecord, PeerState,
};

use pkgmesh_core::config::PeerConfig;

/// Create a peer directory from configuration with a fresh node id.
pub async fn directory_from_config(config: &PeerConfig) -> PeerResult<PeerDirectory> {
    let node_id = uuid::Uuid::new_v4().to_string();
    PeerDirectory::new(node_id, config.ttl(), BlacklistStore::new(&config.blacklist_path)).await
}
