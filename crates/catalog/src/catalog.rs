//! Catalog facade: identity-keyed upserts, links, ranking and location
//! construction on top of a [`CatalogStore`].

use crate::error::{CatalogError, CatalogResult};
use crate::models::{MediaAttrs, MediaRow, ServerAttrs, ServerRow};
use crate::ranking::{PriorityRanking, RankingStrategy, rank_servers};
use crate::repos::{LinkRepo, MediaRepo, ServerRepo};
use crate::store::CatalogStore;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use pkgmesh_core::{MediaKey, Protocol, SafeRelativePath, ServerKey};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;

/// Characters escaped in a URL path segment (RFC 3986 unreserved are kept).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Where a media (or one of its files) lives on a given server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Network protocols: `protocol://host/base_path/relative_path`.
    Url(String),
    /// `protocol = file`: a directory on the local filesystem.
    Path(PathBuf),
}

impl Location {
    /// Location of a file below this one.
    pub fn join(&self, file: &SafeRelativePath) -> Location {
        match self {
            Location::Url(base) => Location::Url(append_segments(base.clone(), file)),
            Location::Path(base) => {
                let mut path = base.clone();
                path.extend(file.segments());
                Location::Path(path)
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Url(url) => f.write_str(url),
            Location::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

fn append_segments(mut url: String, path: &SafeRelativePath) -> String {
    for segment in path.segments() {
        url.push('/');
        url.extend(utf8_percent_encode(segment, PATH_SEGMENT));
    }
    url
}

/// Result of [`Catalog::add_media_source`].
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub media: MediaRow,
    pub server: ServerRow,
    /// Whether the link was created by this call.
    pub linked: bool,
}

/// Persisted registry of media, servers and their links.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    ranking: Arc<dyn RankingStrategy>,
}

impl Catalog {
    /// Wrap a store with the default priority ranking.
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            ranking: Arc::new(PriorityRanking),
        }
    }

    /// Replace the ranking strategy.
    pub fn with_ranking(mut self, ranking: Arc<dyn RankingStrategy>) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub async fn health_check(&self) -> CatalogResult<()> {
        self.store.health_check().await
    }

    pub async fn upsert_server(
        &self,
        key: &ServerKey,
        attrs: &ServerAttrs,
    ) -> CatalogResult<ServerRow> {
        self.store.upsert_server(key, attrs).await
    }

    pub async fn upsert_media(&self, key: &MediaKey, attrs: &MediaAttrs) -> CatalogResult<MediaRow> {
        self.store.upsert_media(key, attrs).await
    }

    /// Get a media or fail with `NotFound`.
    pub async fn get_media(&self, key: &MediaKey) -> CatalogResult<MediaRow> {
        self.store
            .get_media(key)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("media {key}")))
    }

    /// Get a server or fail with `NotFound`.
    pub async fn get_server(&self, key: &ServerKey) -> CatalogResult<ServerRow> {
        self.store
            .get_server(key)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("server {key}")))
    }

    pub async fn list_media(&self) -> CatalogResult<Vec<MediaRow>> {
        self.store.list_media().await
    }

    pub async fn list_servers(&self) -> CatalogResult<Vec<ServerRow>> {
        self.store.list_servers().await
    }

    /// Link a server to a media. Returns false if they were already linked.
    pub async fn link(&self, server: &ServerKey, media: &MediaKey) -> CatalogResult<bool> {
        let server = self.get_server(server).await?;
        let media = self.get_media(media).await?;
        self.store.link(server.id, media.id).await
    }

    /// Remove a link. Returns false if there was none.
    pub async fn unlink(&self, server: &ServerKey, media: &MediaKey) -> CatalogResult<bool> {
        let server = self.get_server(server).await?;
        let media = self.get_media(media).await?;
        self.store.unlink(server.id, media.id).await
    }

    /// Upsert a media and a server and make sure they are linked.
    ///
    /// Calling this twice with the same arguments leaves one row of each and
    /// one link.
    pub async fn add_media_source(
        &self,
        media_key: &MediaKey,
        media_attrs: &MediaAttrs,
        server_key: &ServerKey,
        server_attrs: &ServerAttrs,
    ) -> CatalogResult<MediaSource> {
        let media = self.store.upsert_media(media_key, media_attrs).await?;
        let server = self.store.upsert_server(server_key, server_attrs).await?;
        let linked = self.store.link(server.id, media.id).await?;
        if linked {
            tracing::info!(media = %media_key, server = %server_key, "Linked media source");
        }
        Ok(MediaSource {
            media,
            server,
            linked,
        })
    }

    /// Remove a server together with its links.
    pub async fn remove_server(&self, key: &ServerKey) -> CatalogResult<()> {
        let server = self.get_server(key).await?;
        self.store.delete_server(server.id).await?;
        tracing::info!(server = %key, "Server removed");
        Ok(())
    }

    /// Remove a media together with its links. Cached files are left alone.
    pub async fn remove_media(&self, key: &MediaKey) -> CatalogResult<()> {
        let media = self.get_media(key).await?;
        self.store.delete_media(media.id).await?;
        tracing::info!(media = %key, "Media removed");
        Ok(())
    }

    /// Location of `media` on `server`. Fails with `NotFound` when either is
    /// unknown or they are not linked.
    pub async fn resolve_location(
        &self,
        media: &MediaKey,
        server: &ServerKey,
    ) -> CatalogResult<Location> {
        let media_row = self.get_media(media).await?;
        let server_row = self.get_server(server).await?;
        if !self.store.is_linked(server_row.id, media_row.id).await? {
            return Err(CatalogError::NotFound(format!(
                "media {media} is not served by {server}"
            )));
        }
        location_of(&media_row, &server_row)
    }

    /// Enabled servers linked to `media`, best first.
    pub async fn ranked_servers_for(&self, media: &MediaKey) -> CatalogResult<Vec<ServerRow>> {
        let media_row = self.get_media(media).await?;
        let mut servers = self.store.servers_for_media(media_row.id).await?;
        rank_servers(self.ranking.as_ref(), &mut servers);
        Ok(servers)
    }

    /// Store the result of a metadata synchronisation.
    pub async fn record_sync(
        &self,
        media: &MediaKey,
        metadata_checksum: &str,
        at: OffsetDateTime,
    ) -> CatalogResult<()> {
        let media_row = self.get_media(media).await?;
        self.store
            .record_sync(media_row.id, metadata_checksum, at)
            .await
    }

    /// Count a fetch outcome against a server.
    pub async fn record_outcome(&self, server_id: i64, success: bool) -> CatalogResult<()> {
        self.store.record_outcome(server_id, success).await
    }
}

/// Location of a media's root on a server, from the stored rows alone.
///
/// The stored relative path is re-validated here, so a row that was edited
/// behind the catalog's back still cannot climb out of the server root.
pub fn location_of(media: &MediaRow, server: &ServerRow) -> CatalogResult<Location> {
    let relative = SafeRelativePath::parse(&media.relative_path)
        .map_err(|e| CatalogError::PathSafetyViolation(e.to_string()))?;
    let key = server.key()?;
    match key.protocol {
        Protocol::File => {
            let root = PathBuf::from(&key.base_path);
            let location = Location::Path(root.clone()).join(&relative);
            match &location {
                Location::Path(path) if path.starts_with(&root) => Ok(location),
                _ => Err(CatalogError::PathSafetyViolation(format!(
                    "{} escapes {}",
                    relative,
                    root.display()
                ))),
            }
        }
        Protocol::Http | Protocol::Https => {
            Ok(Location::Url(append_segments(key.base_url(), &relative)))
        }
    }
}
