//! Artifact cache for pkgmesh.
//!
//! This crate provides:
//! - The on-disk layout keyed by media identity
//! - Staged writes committed by atomic rename
//! - Holdings, usage and age-based cleanup for the eviction policy

pub mod error;
pub mod staging;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use staging::{StagedArtifact, StagedWrite};
pub use store::{CacheEntry, CacheStore, CleanupReport, MEDIAS_DIR, OpenArtifact};

use pkgmesh_core::config::CacheConfig;

/// Open the cache described by the configuration.
pub async fn from_config(config: &CacheConfig) -> CacheResult<CacheStore> {
    let store = CacheStore::new(&config.root).await?;
    tracing::debug!(root = %store.root().display(), "Cache opened");
    Ok(store)
}
