//! Server repository trait.

use crate::error::CatalogResult;
use crate::models::{ServerAttrs, ServerRow};
use async_trait::async_trait;
use pkgmesh_core::ServerKey;

/// Repository for servers (physical sources).
#[async_trait]
pub trait ServerRepo: Send + Sync {
    /// Insert a server or update the mutable attributes of an existing one.
    async fn upsert_server(&self, key: &ServerKey, attrs: &ServerAttrs)
    -> CatalogResult<ServerRow>;

    /// Get a server by identity.
    async fn get_server(&self, key: &ServerKey) -> CatalogResult<Option<ServerRow>>;

    /// List all servers in creation order.
    async fn list_servers(&self) -> CatalogResult<Vec<ServerRow>>;

    /// Delete a server and its links.
    async fn delete_server(&self, server_id: i64) -> CatalogResult<()>;

    /// Bump the success or failure counter of a server.
    async fn record_outcome(&self, server_id: i64, success: bool) -> CatalogResult<()>;
}
