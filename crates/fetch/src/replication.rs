//! Proactive replication of media into the local cache.
//!
//! The engine turns a media's replication policy into a set of desired
//! artifacts, diffs it against what the cache already holds and feeds the
//! missing ones through the [`Coordinator`]. Package metadata, membership
//! lists and dependency closures come from pluggable collaborators.

use crate::coordinator::{ArtifactRequest, Coordinator};
use crate::error::{FetchError, FetchResult};
use crate::eviction::{EvictionReport, evict};
use async_trait::async_trait;
use pkgmesh_catalog::MediaRow;
use pkgmesh_core::config::ReplicationConfig;
use pkgmesh_core::{
    ArtifactId, ContentHash, MediaIdentity, MediaKey, PackageRecord, ReplicationPolicy,
    SafeRelativePath, latest_only,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::instrument;

/// Expands a set of package names into its dependency closure.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn closure(
        &self,
        required: &BTreeSet<String>,
        include_recommends: bool,
    ) -> FetchResult<BTreeSet<String>>;
}

/// The closure of a set is the set itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDependencies;

#[async_trait]
impl DependencyResolver for NoDependencies {
    async fn closure(
        &self,
        required: &BTreeSet<String>,
        _include_recommends: bool,
    ) -> FetchResult<BTreeSet<String>> {
        Ok(required.clone())
    }
}

/// Which packages a seeded media should carry.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn members(&self, media: &MediaKey) -> FetchResult<BTreeSet<String>>;
}

/// Membership lists from `replication.seed_members`.
#[derive(Clone, Debug, Default)]
pub struct ConfigMembership {
    members: BTreeMap<String, BTreeSet<String>>,
}

impl ConfigMembership {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            members: config
                .seed_members
                .iter()
                .map(|(media, names)| (media.clone(), names.iter().cloned().collect()))
                .collect(),
        }
    }
}

#[async_trait]
impl MembershipSource for ConfigMembership {
    async fn members(&self, media: &MediaKey) -> FetchResult<BTreeSet<String>> {
        Ok(self
            .members
            .get(&media.to_string())
            .cloned()
            .unwrap_or_default())
    }
}

/// The packages a media's current metadata advertises.
#[async_trait]
pub trait MediaIndex: Send + Sync {
    async fn packages(&self, media: &MediaRow) -> FetchResult<Vec<PackageRecord>>;
}

/// An index that knows no packages. Metadata is still synchronised, but
/// `full` and `seed` media plan nothing until a real index is plugged in.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoIndex;

#[async_trait]
impl MediaIndex for NoIndex {
    async fn packages(&self, _media: &MediaRow) -> FetchResult<Vec<PackageRecord>> {
        Ok(Vec::new())
    }
}

/// Desired artifacts of one media that the cache does not hold yet.
#[derive(Clone, Debug)]
pub struct ReplicationPlan {
    pub media: MediaKey,
    pub policy: ReplicationPolicy,
    /// Size of the desired set, held or not.
    pub desired: usize,
    /// Missing artifacts within the byte budget, in package-name order.
    pub missing: Vec<ArtifactId>,
    pub planned_bytes: u64,
    /// Missing artifacts left for a later run.
    pub deferred: usize,
}

impl ReplicationPlan {
    fn empty(media: MediaKey, policy: ReplicationPolicy) -> Self {
        Self {
            media,
            policy,
            desired: 0,
            missing: Vec::new(),
            planned_bytes: 0,
            deferred: 0,
        }
    }
}

/// Outcome of a replication run for one media.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub media: String,
    pub desired: usize,
    pub submitted: usize,
    pub fetched: usize,
    pub failed: usize,
    pub bytes: u64,
    pub deferred: usize,
}

/// Outcome of a metadata synchronisation for one media.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub media: String,
    pub files: usize,
    pub checksum: String,
    /// False when the metadata matched the stored checksum.
    pub changed: bool,
}

/// Seed/full replication, metadata sync and quota eviction.
pub struct ReplicationEngine {
    coordinator: Coordinator,
    config: ReplicationConfig,
    quotas: BTreeMap<String, u64>,
    resolver: Arc<dyn DependencyResolver>,
    membership: Arc<dyn MembershipSource>,
    index: Arc<dyn MediaIndex>,
    last_refresh: RwLock<Option<OffsetDateTime>>,
}

impl ReplicationEngine {
    pub fn new(
        coordinator: Coordinator,
        config: ReplicationConfig,
        quotas: BTreeMap<String, u64>,
    ) -> Self {
        Self {
            coordinator,
            membership: Arc::new(ConfigMembership::from_config(&config)),
            config,
            quotas,
            resolver: Arc::new(NoDependencies),
            index: Arc::new(NoIndex),
            last_refresh: RwLock::new(None),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_membership(mut self, membership: Arc<dyn MembershipSource>) -> Self {
        self.membership = membership;
        self
    }

    pub fn with_index(mut self, index: Arc<dyn MediaIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Completion time of the last metadata pass.
    pub async fn last_refresh(&self) -> Option<OffsetDateTime> {
        *self.last_refresh.read().await
    }

    /// Compute what `media` is missing, spending at most `budget` bytes.
    ///
    /// Planning stops at the first artifact that would overflow the budget;
    /// it and everything after it are deferred.
    #[instrument(skip_all, fields(media = %media.key()))]
    pub async fn plan(&self, media: &MediaRow, budget: u64) -> FetchResult<ReplicationPlan> {
        let key = media.key();
        let policy = media.policy()?;
        let identity = media.identity()?;

        let packages = match policy {
            ReplicationPolicy::None | ReplicationPolicy::OnDemand => {
                return Ok(ReplicationPlan::empty(key, policy));
            }
            ReplicationPolicy::Full => self.index.packages(media).await?,
            ReplicationPolicy::Seed => {
                let members = self.membership.members(&key).await?;
                if members.is_empty() {
                    tracing::debug!("Seeded media has no members");
                    return Ok(ReplicationPlan::empty(key, policy));
                }
                let closure = self
                    .resolver
                    .closure(&members, self.config.include_recommends)
                    .await?;
                self.index
                    .packages(media)
                    .await?
                    .into_iter()
                    .filter(|pkg| closure.contains(&pkg.name))
                    .collect()
            }
        };

        let packages = if self.config.latest_only {
            latest_only(packages)
        } else {
            let mut packages = packages;
            packages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.evr.cmp(&b.evr)));
            packages
        };
        let desired = artifacts_of(&identity, packages);

        let held: HashMap<SafeRelativePath, u64> = self
            .coordinator
            .cache()
            .holdings(&identity.subtree())
            .await?
            .into_iter()
            .map(|entry| (entry.key, entry.size))
            .collect();

        let mut plan = ReplicationPlan::empty(key, policy);
        plan.desired = desired.len();
        let missing: Vec<ArtifactId> = desired
            .into_iter()
            .filter(|artifact| match held.get(&artifact.cache_key()) {
                Some(size) => artifact.size.is_some_and(|expected| expected != *size),
                None => true,
            })
            .collect();

        let total = missing.len();
        for artifact in missing {
            let size = artifact.size.unwrap_or_default();
            if plan.planned_bytes + size > budget {
                break;
            }
            plan.planned_bytes += size;
            plan.missing.push(artifact);
        }
        plan.deferred = total - plan.missing.len();
        if plan.deferred > 0 {
            tracing::info!(
                deferred = plan.deferred,
                budget,
                "Predownload budget reached, deferring the rest"
            );
        }
        Ok(plan)
    }

    /// Plan `media` and fetch what is missing.
    pub async fn run(&self, media: &MediaRow, budget: u64) -> FetchResult<ReplicationReport> {
        let plan = self.plan(media, budget).await?;
        let mut report = ReplicationReport {
            media: plan.media.to_string(),
            desired: plan.desired,
            submitted: plan.missing.len(),
            deferred: plan.deferred,
            ..ReplicationReport::default()
        };
        if plan.missing.is_empty() {
            return Ok(report);
        }

        let requests = plan.missing.into_iter().map(ArtifactRequest::new).collect();
        for result in self.coordinator.fetch_all(requests).await {
            match result {
                Ok(fetched) => {
                    report.fetched += 1;
                    report.bytes += fetched.size;
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(media = %report.media, error = %e, "Predownload failed");
                }
            }
        }
        tracing::info!(
            media = %report.media,
            fetched = report.fetched,
            failed = report.failed,
            bytes = report.bytes,
            "Replication run finished"
        );
        Ok(report)
    }

    /// Replicate every enabled media, sharing one byte budget.
    pub async fn run_all(&self) -> FetchResult<Vec<ReplicationReport>> {
        let mut budget = self.config.max_predownload_bytes;
        let mut reports = Vec::new();
        for media in self.coordinator.catalog().list_media().await? {
            if !media.enabled {
                continue;
            }
            match self.run(&media, budget).await {
                Ok(report) => {
                    budget = budget.saturating_sub(report.bytes);
                    reports.push(report);
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => {
                    tracing::warn!(media = %media.key(), error = %e, "Replication failed");
                }
            }
        }
        Ok(reports)
    }

    fn metadata_artifacts(&self, identity: &MediaIdentity) -> Vec<ArtifactId> {
        self.config
            .metadata_files
            .iter()
            .filter_map(|file| match SafeRelativePath::parse(file) {
                Ok(path) => Some(ArtifactId::new(identity.clone(), path)),
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "Skipping unsafe metadata path");
                    None
                }
            })
            .collect()
    }

    /// Refetch the metadata files of `media` from its servers and record the
    /// sync when their combined checksum changed.
    #[instrument(skip_all, fields(media = %media.key()))]
    pub async fn sync_metadata(&self, media: &MediaRow) -> FetchResult<SyncReport> {
        let identity = media.identity()?;
        let mut combined = ContentHash::hasher();
        let mut files = 0;
        let mut last_error = None;

        for artifact in self.metadata_artifacts(&identity) {
            let path = artifact.path.clone();
            match self.coordinator.fetch(ArtifactRequest::refresh(artifact)).await {
                Ok(fetched) => {
                    let sha256 = match fetched.sha256 {
                        Some(sha256) => sha256,
                        None => ContentHash::compute(&self.coordinator.cache().get(&fetched.key).await?),
                    };
                    combined.update(path.as_str().as_bytes());
                    combined.update(sha256.as_bytes());
                    files += 1;
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => {
                    tracing::warn!(file = %path, error = %e, "Metadata file not refreshed");
                    last_error = Some(e);
                }
            }
        }

        if files == 0 {
            return Err(last_error.unwrap_or_else(|| {
                FetchError::NotFound(format!("no metadata files configured for {}", media.key()))
            }));
        }

        let checksum = combined.finalize().to_hex();
        let changed = media.metadata_checksum.as_deref() != Some(checksum.as_str());
        if changed {
            self.coordinator
                .catalog()
                .record_sync(&media.key(), &checksum, OffsetDateTime::now_utc())
                .await?;
            tracing::info!(files, "Metadata updated");
        } else {
            tracing::debug!("Metadata unchanged");
        }
        Ok(SyncReport {
            media: media.key().to_string(),
            files,
            checksum,
            changed,
        })
    }

    /// Synchronise the metadata of every enabled media.
    pub async fn sync_all_metadata(&self) -> FetchResult<Vec<SyncReport>> {
        let mut reports = Vec::new();
        for media in self.coordinator.catalog().list_media().await? {
            if !media.enabled {
                continue;
            }
            match self.sync_metadata(&media).await {
                Ok(report) => reports.push(report),
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => tracing::warn!(media = %media.key(), error = %e, "Metadata sync failed"),
            }
        }
        *self.last_refresh.write().await = Some(OffsetDateTime::now_utc());
        Ok(reports)
    }

    /// Cache keys referenced by the current metadata of `media`, metadata
    /// files included.
    pub async fn referenced_keys(&self, media: &MediaRow) -> FetchResult<HashSet<SafeRelativePath>> {
        let identity = media.identity()?;
        let packages = self.index.packages(media).await?;
        Ok(artifacts_of(&identity, packages)
            .into_iter()
            .chain(self.metadata_artifacts(&identity))
            .map(|artifact| artifact.cache_key())
            .collect())
    }

    /// Everything any enabled media still references.
    pub async fn keep_set(&self) -> FetchResult<HashSet<SafeRelativePath>> {
        let mut keep = HashSet::new();
        for media in self.coordinator.catalog().list_media().await? {
            if media.enabled {
                keep.extend(self.referenced_keys(&media).await?);
            }
        }
        Ok(keep)
    }

    /// Enforce the configured quota of `media`, if any.
    pub async fn evict_media(&self, media: &MediaRow) -> FetchResult<Option<EvictionReport>> {
        let Some(&quota) = self.quotas.get(&media.key().to_string()) else {
            return Ok(None);
        };
        let identity = media.identity()?;
        let referenced = self.referenced_keys(media).await?;
        let pinned = self
            .metadata_artifacts(&identity)
            .into_iter()
            .map(|artifact| artifact.cache_key())
            .collect();
        let report = evict(
            self.coordinator.cache(),
            &identity,
            media.priority,
            quota,
            &referenced,
            &pinned,
        )
        .await?;
        Ok(Some(report))
    }

    /// Enforce every configured quota. Media over quota are logged.
    pub async fn evict_all(&self) -> FetchResult<Vec<EvictionReport>> {
        let mut reports = Vec::new();
        for media in self.coordinator.catalog().list_media().await? {
            match self.evict_media(&media).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => tracing::warn!(media = %media.key(), error = %e, "Eviction failed"),
            }
        }
        Ok(reports)
    }
}

/// Package records as artifacts of `media`. Unsafe file names are skipped.
fn artifacts_of(media: &MediaIdentity, packages: Vec<PackageRecord>) -> Vec<ArtifactId> {
    packages
        .into_iter()
        .filter_map(|pkg| {
            let path = match SafeRelativePath::parse(&pkg.filename) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(
                        package = %pkg.name,
                        file = %pkg.filename,
                        error = %e,
                        "Skipping package with unsafe file name"
                    );
                    return None;
                }
            };
            let mut artifact = ArtifactId::new(media.clone(), path).with_size(pkg.size);
            artifact.sha256 = pkg.sha256;
            artifact.signature = pkg.signature;
            Some(artifact)
        })
        .collect()
}
