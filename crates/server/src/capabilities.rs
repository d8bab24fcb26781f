//! Capabilities advertised in our peer announces.

use async_trait::async_trait;
use pkgmesh_catalog::Catalog;
use pkgmesh_peers::{Capability, CapabilitySource};
use std::collections::BTreeSet;

/// The `(version, arch)` pairs of every enabled media in the catalog.
pub struct CatalogCapabilities {
    catalog: Catalog,
}

impl CatalogCapabilities {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl CapabilitySource for CatalogCapabilities {
    async fn capabilities(&self) -> Vec<Capability> {
        match self.catalog.list_media().await {
            Ok(media) => media
                .into_iter()
                .filter(|m| m.enabled)
                .map(|m| Capability::new(m.mageia_version, m.architecture))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not list media for announce");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmesh_catalog::{MediaAttrs, SqliteStore};
    use pkgmesh_core::{MediaKey, SafeRelativePath};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_capabilities_are_unique_and_enabled_only() {
        let temp = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("catalog.db")).await.unwrap();
        let catalog = Catalog::new(Arc::new(store));

        let release = SafeRelativePath::parse("media/core/release").unwrap();
        let updates = SafeRelativePath::parse("media/core/updates").unwrap();
        let mut disabled = MediaAttrs::official("Core 10", release.clone());
        disabled.enabled = false;
        catalog
            .upsert_media(
                &MediaKey::new("9", "x86_64", "core-release").unwrap(),
                &MediaAttrs::official("Core Release", release),
            )
            .await
            .unwrap();
        catalog
            .upsert_media(
                &MediaKey::new("9", "x86_64", "core-updates").unwrap(),
                &MediaAttrs::official("Core Updates", updates),
            )
            .await
            .unwrap();
        catalog
            .upsert_media(&MediaKey::new("10", "aarch64", "core-release").unwrap(), &disabled)
            .await
            .unwrap();

        let caps = CatalogCapabilities::new(catalog).capabilities().await;
        assert_eq!(caps, vec![Capability::new("9", "x86_64")]);
    }
}
