//! Shared fixtures for the coordinator and replication tests.

use crate::coordinator::Coordinator;
use httpmock::MockServer;
use pkgmesh_cache::CacheStore;
use pkgmesh_catalog::{Catalog, MediaAttrs, ServerAttrs, SqliteStore};
use pkgmesh_core::config::FetchConfig;
use pkgmesh_core::{
    ArtifactId, ContentHash, MediaIdentity, MediaKey, MediaScope, SafeRelativePath, ServerKey,
};
use pkgmesh_peers::{Announce, BlacklistStore, Capability, PeerDirectory};
use pkgmesh_signer::TrustedKeys;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub(crate) fn body() -> &'static str {
    "rpm-payload-good"
}

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub catalog: Catalog,
    pub cache: CacheStore,
    pub peers: Arc<PeerDirectory>,
    pub config: FetchConfig,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("catalog.db")).await.unwrap();
        let catalog = Catalog::new(Arc::new(store));
        let cache = CacheStore::new(dir.path().join("cache")).await.unwrap();
        let peers = Arc::new(
            PeerDirectory::new(
                "self",
                Duration::from_secs(180),
                BlacklistStore::new(dir.path().join("peer-blacklist.json")),
            )
            .await
            .unwrap(),
        );
        let config = FetchConfig {
            connect_timeout_secs: 2,
            stall_timeout_secs: 5,
            ..FetchConfig::default()
        };
        Self {
            dir,
            catalog,
            cache,
            peers,
            config,
        }
    }

    pub fn coordinator(&self) -> Coordinator {
        self.coordinator_with(self.config.clone())
    }

    pub fn coordinator_with(&self, config: FetchConfig) -> Coordinator {
        self.build_coordinator(TrustedKeys::default(), config)
    }

    pub fn coordinator_with_keys(&self, keys: TrustedKeys) -> Coordinator {
        self.build_coordinator(keys, self.config.clone())
    }

    fn build_coordinator(&self, keys: TrustedKeys, config: FetchConfig) -> Coordinator {
        Coordinator::new(
            self.catalog.clone(),
            self.cache.clone(),
            Arc::clone(&self.peers),
            keys,
            config,
        )
        .unwrap()
    }

    pub fn media_key() -> MediaKey {
        MediaKey::new("9", "x86_64", "extras").unwrap()
    }

    pub fn media() -> MediaIdentity {
        MediaIdentity::new(Self::media_key(), MediaScope::Custom).unwrap()
    }

    pub fn media_attrs() -> MediaAttrs {
        MediaAttrs::custom("Extras", SafeRelativePath::parse("extras").unwrap())
    }

    pub fn artifact(&self) -> ArtifactId {
        ArtifactId::new(Self::media(), SafeRelativePath::parse("a.rpm").unwrap())
    }

    pub fn artifact_with_checksum(&self) -> ArtifactId {
        self.artifact()
            .with_size(body().len() as u64)
            .with_sha256(ContentHash::compute(body().as_bytes()))
    }

    pub async fn add_server(&self, mirror: &MockServer, name: &str, priority: i64) {
        self.add_server_with(mirror, name, priority, &Self::media_attrs())
            .await;
    }

    pub async fn add_server_with(
        &self,
        mirror: &MockServer,
        name: &str,
        priority: i64,
        media_attrs: &MediaAttrs,
    ) {
        self.add_server_at(mirror.address(), name, priority, &Self::media_key(), media_attrs)
            .await;
    }

    /// Link an HTTP mirror at `address` to any media.
    pub async fn add_server_at(
        &self,
        address: &SocketAddr,
        name: &str,
        priority: i64,
        media: &MediaKey,
        media_attrs: &MediaAttrs,
    ) {
        let key = ServerKey::parse_url(&format!("http://{address}/mirror")).unwrap();
        self.catalog
            .add_media_source(
                media,
                media_attrs,
                &key,
                &ServerAttrs::new(name, false).with_priority(priority),
            )
            .await
            .unwrap();
    }

    pub async fn add_file_server(&self, root: &Path, name: &str) {
        let key = ServerKey::parse_url(&format!("file://{}", root.display())).unwrap();
        self.catalog
            .add_media_source(
                &Self::media_key(),
                &Self::media_attrs(),
                &key,
                &ServerAttrs::new(name, false),
            )
            .await
            .unwrap();
    }

    pub async fn announce_peer(&self, peer: &MockServer) {
        let address = *peer.address();
        let announce = Announce::new(
            format!("peer-{}", address.port()),
            address.port(),
            vec![Capability::new("9", "x86_64")],
        );
        self.peers.announce(address, &announce).await;
    }

    pub async fn server_id(&self, name: &str) -> i64 {
        self.catalog
            .list_servers()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap()
            .id
    }
}
