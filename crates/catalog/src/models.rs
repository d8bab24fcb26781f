//! Database models mapping to the catalog schema.

use crate::error::CatalogResult;
use pkgmesh_core::{
    IpMode, MediaIdentity, MediaKey, MediaScope, Protocol, ReplicationPolicy, SafeRelativePath,
    ServerKey,
};
use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Media
// =============================================================================

/// Media record. `id` grows with creation order.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct MediaRow {
    pub id: i64,
    pub name: String,
    pub short_name: String,
    pub mageia_version: String,
    pub architecture: String,
    pub relative_path: String,
    pub is_official: bool,
    pub enabled: bool,
    pub update_media: bool,
    pub priority: i64,
    pub replication_policy: String,
    pub last_sync: Option<OffsetDateTime>,
    pub metadata_checksum: Option<String>,
    pub created_at: OffsetDateTime,
}

impl MediaRow {
    /// Identity key of this media.
    pub fn key(&self) -> MediaKey {
        MediaKey {
            version: self.mageia_version.clone(),
            arch: self.architecture.clone(),
            short_name: self.short_name.clone(),
        }
    }

    /// Upstream position, re-validated on every read.
    pub fn relative_path(&self) -> CatalogResult<SafeRelativePath> {
        Ok(SafeRelativePath::parse(&self.relative_path)?)
    }

    /// Key and scope, i.e. where this media's files live in the cache.
    pub fn identity(&self) -> CatalogResult<MediaIdentity> {
        let scope = MediaScope::from_relative_path(self.is_official, &self.relative_path()?)?;
        Ok(MediaIdentity::new(self.key(), scope)?)
    }

    pub fn policy(&self) -> CatalogResult<ReplicationPolicy> {
        Ok(self.replication_policy.parse()?)
    }
}

/// Attributes supplied when adding or updating a media.
#[derive(Debug, Clone)]
pub struct MediaAttrs {
    pub name: String,
    pub relative_path: SafeRelativePath,
    /// Only honoured on creation; a later upsert with a different value is rejected.
    pub is_official: bool,
    pub enabled: bool,
    pub update_media: bool,
    pub priority: i64,
    pub replication_policy: ReplicationPolicy,
}

impl MediaAttrs {
    /// Official media at `relative_path` with default settings.
    pub fn official(name: impl Into<String>, relative_path: SafeRelativePath) -> Self {
        Self {
            name: name.into(),
            relative_path,
            is_official: true,
            enabled: true,
            update_media: false,
            priority: 50,
            replication_policy: ReplicationPolicy::default(),
        }
    }

    /// Custom (third-party) media with default settings.
    pub fn custom(name: impl Into<String>, relative_path: SafeRelativePath) -> Self {
        Self {
            is_official: false,
            ..Self::official(name, relative_path)
        }
    }
}

// =============================================================================
// Servers
// =============================================================================

/// Server record. Quality fields are recorded but not used for V1 ranking.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ServerRow {
    pub id: i64,
    pub name: String,
    pub protocol: String,
    pub host: String,
    pub base_path: String,
    pub is_official: bool,
    pub enabled: bool,
    pub priority: i64,
    pub ip_mode: String,
    pub latency_ms: Option<i64>,
    pub bandwidth_kbps: Option<i64>,
    pub failure_count: Option<i64>,
    pub success_count: Option<i64>,
    pub created_at: OffsetDateTime,
}

impl ServerRow {
    pub fn protocol(&self) -> CatalogResult<Protocol> {
        Ok(self.protocol.parse()?)
    }

    pub fn ip_mode(&self) -> CatalogResult<IpMode> {
        Ok(self.ip_mode.parse()?)
    }

    /// Identity key of this server.
    pub fn key(&self) -> CatalogResult<ServerKey> {
        Ok(ServerKey::new(self.protocol()?, &self.host, &self.base_path)?)
    }
}

/// Attributes supplied when adding or updating a server.
#[derive(Debug, Clone)]
pub struct ServerAttrs {
    pub name: String,
    pub is_official: bool,
    pub enabled: bool,
    pub priority: i64,
    pub ip_mode: IpMode,
}

impl ServerAttrs {
    /// Server with default settings.
    pub fn new(name: impl Into<String>, is_official: bool) -> Self {
        Self {
            name: name.into(),
            is_official,
            enabled: true,
            priority: 50,
            ip_mode: IpMode::default(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}
