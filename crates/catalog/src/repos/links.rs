//! Server/media link repository trait.

use crate::error::CatalogResult;
use crate::models::{MediaRow, ServerRow};
use async_trait::async_trait;

/// Repository for the many-to-many server/media relation.
#[async_trait]
pub trait LinkRepo: Send + Sync {
    /// Link a server to a media. Returns false if the link already existed.
    async fn link(&self, server_id: i64, media_id: i64) -> CatalogResult<bool>;

    /// Remove a link. Returns false if there was none.
    async fn unlink(&self, server_id: i64, media_id: i64) -> CatalogResult<bool>;

    /// Whether a link exists.
    async fn is_linked(&self, server_id: i64, media_id: i64) -> CatalogResult<bool>;

    /// Enabled servers linked to a media, in creation order.
    async fn servers_for_media(&self, media_id: i64) -> CatalogResult<Vec<ServerRow>>;

    /// Total number of links.
    async fn count_links(&self) -> CatalogResult<u64>;
}
