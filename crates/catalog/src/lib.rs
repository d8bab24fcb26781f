//! Catalog of media and servers for pkgmesh.
//!
//! This crate provides:
//! - Media (logical repositories) and servers (physical sources)
//! - The many-to-many server/media link table
//! - Server ranking and location construction

pub mod catalog;
pub mod error;
pub mod models;
pub mod ranking;
pub mod repos;
pub mod store;

pub use catalog::{Catalog, Location, MediaSource, location_of};
pub use error::{CatalogError, CatalogResult};
pub use models::{MediaAttrs, MediaRow, ServerAttrs, ServerRow};
pub use ranking::{PriorityRanking, RankingStrategy};
pub use store::{CatalogStore, SqliteStore};

use pkgmesh_core::config::CatalogConfig;
use std::sync::Arc;

/// Create a catalog store from configuration.
pub async fn from_config(config: &CatalogConfig) -> CatalogResult<Arc<dyn CatalogStore>> {
    let store = SqliteStore::new(&config.path).await?;
    Ok(Arc::new(store) as Arc<dyn CatalogStore>)
}
