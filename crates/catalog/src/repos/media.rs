//! Media repository trait.

use crate::error::CatalogResult;
use crate::models::{MediaAttrs, MediaRow};
use async_trait::async_trait;
use pkgmesh_core::MediaKey;
use time::OffsetDateTime;

/// Repository for media (logical repositories).
#[async_trait]
pub trait MediaRepo: Send + Sync {
    /// Insert a media or update the mutable attributes of an existing one.
    ///
    /// Returns `Conflict` when the official flag would change, or when a
    /// custom media with the same short name already exists under another
    /// version or architecture.
    async fn upsert_media(&self, key: &MediaKey, attrs: &MediaAttrs) -> CatalogResult<MediaRow>;

    /// Get a media by identity.
    async fn get_media(&self, key: &MediaKey) -> CatalogResult<Option<MediaRow>>;

    /// List all media in creation order.
    async fn list_media(&self) -> CatalogResult<Vec<MediaRow>>;

    /// Record a completed metadata synchronisation.
    async fn record_sync(
        &self,
        media_id: i64,
        metadata_checksum: &str,
        at: OffsetDateTime,
    ) -> CatalogResult<()>;

    /// Delete a media and its links.
    async fn delete_media(&self, media_id: i64) -> CatalogResult<()>;
}
