//! Application state shared across handlers.

use anyhow::{Context, Result};
use pkgmesh_cache::CacheStore;
use pkgmesh_catalog::Catalog;
use pkgmesh_core::config::AppConfig;
use pkgmesh_fetch::{Coordinator, ReplicationEngine};
use pkgmesh_peers::PeerDirectory;
use pkgmesh_signer::TrustedKeys;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog: Catalog,
    pub cache: CacheStore,
    pub peers: Arc<PeerDirectory>,
    pub coordinator: Coordinator,
    pub replication: Arc<ReplicationEngine>,
    pub start_time: OffsetDateTime,
}

impl AppState {
    /// Open every component described by the configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration fails validation.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        if let Err(error) = config.validate() {
            panic!("Invalid configuration: {error}");
        }

        let store = pkgmesh_catalog::from_config(&config.catalog)
            .await
            .context("failed to open catalog")?;
        let catalog = Catalog::new(store);
        tracing::info!(path = %config.catalog.path.display(), "Catalog opened");

        let cache = pkgmesh_cache::from_config(&config.cache)
            .await
            .context("failed to open cache")?;

        let peers = Arc::new(
            pkgmesh_peers::directory_from_config(&config.peers)
                .await
                .context("failed to load peer blacklist")?,
        );
        tracing::info!(node_id = %peers.node_id(), "Peer directory ready");

        let trusted_keys =
            TrustedKeys::from_config(&config.signing).context("failed to load trusted keys")?;
        if trusted_keys.is_empty() {
            tracing::info!("No trusted signing keys configured, signatures are not checked");
        }

        let coordinator = Coordinator::new(
            catalog.clone(),
            cache.clone(),
            Arc::clone(&peers),
            trusted_keys,
            config.fetch.clone(),
        )
        .context("failed to create download coordinator")?;

        let replication = Arc::new(ReplicationEngine::new(
            coordinator.clone(),
            config.replication.clone(),
            config.cache.quotas.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            catalog,
            cache,
            peers,
            coordinator,
            replication,
            start_time: OffsetDateTime::now_utc(),
        })
    }

    /// Token the background tasks stop on. It is the coordinator's own token,
    /// so queued fetches are cancelled the moment shutdown begins.
    pub fn cancellation(&self) -> CancellationToken {
        self.coordinator.cancellation()
    }

    /// Begin shutdown: cancel queued fetches and stop background tasks.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmesh_core::{ArtifactId, MediaIdentity, MediaKey, MediaScope, SafeRelativePath};
    use pkgmesh_fetch::{ArtifactRequest, FetchError};

    #[tokio::test]
    async fn test_from_config_opens_components() {
        let temp = tempfile::tempdir().unwrap();
        let state = AppState::from_config(AppConfig::for_testing(temp.path()))
            .await
            .unwrap();
        assert!(temp.path().join("catalog.db").exists());
        assert!(temp.path().join("cache").join(pkgmesh_cache::MEDIAS_DIR).is_dir());
        assert_eq!(state.coordinator.workers(), state.config.fetch.workers);
        assert!(state.catalog.list_media().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_fetches_and_background_tasks() {
        let temp = tempfile::tempdir().unwrap();
        let state = AppState::from_config(AppConfig::for_testing(temp.path()))
            .await
            .unwrap();
        let background = state.cancellation();
        assert!(!background.is_cancelled());

        state.shutdown();
        assert!(background.is_cancelled());
        let artifact = ArtifactId::new(
            MediaIdentity::new(
                MediaKey::new("9", "x86_64", "core").unwrap(),
                MediaScope::Custom,
            )
            .unwrap(),
            SafeRelativePath::parse("a.rpm").unwrap(),
        );
        let err = state
            .coordinator
            .fetch(ArtifactRequest::new(artifact))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }

    #[tokio::test]
    #[should_panic(expected = "Invalid configuration")]
    async fn test_invalid_config_panics() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::for_testing(temp.path());
        config.replication.tick_secs = 0;
        let _ = AppState::from_config(config).await;
    }
}
