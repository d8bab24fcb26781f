//! The download coordinator.
//!
//! A request is answered from the cache when possible. Otherwise one job per
//! artifact is run on a bounded worker pool, trying peers that claim the
//! artifact before catalog servers in rank order. Every attempt is staged,
//! verified and only then committed.

use crate::error::{FetchError, FetchResult};
use crate::job::{Candidate, DownloadJob, JobState, SourceKey};
use crate::metrics::{
    BYTES_COMMITTED, CACHE_HITS, COALESCED_WAITERS, FETCH_ATTEMPTS, PEERS_BLACKLISTED,
};
use crate::transfer::{self, HttpClients};
use crate::verify::verify_artifact;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use pkgmesh_cache::CacheStore;
use pkgmesh_catalog::{Catalog, CatalogError, Location, MediaRow, location_of};
use pkgmesh_core::config::FetchConfig;
use pkgmesh_core::{ArtifactId, ContentHash, SafeRelativePath};
use pkgmesh_peers::{PeerCandidate, PeerClient, PeerDirectory};
use pkgmesh_signer::TrustedKeys;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Whether a cached or peer copy is acceptable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Freshness {
    /// Any verified copy will do.
    #[default]
    Cached,
    /// Go to the catalog servers; used for metadata, which peers cannot vouch for.
    Refresh,
}

/// A request for one artifact.
#[derive(Clone, Debug)]
pub struct ArtifactRequest {
    pub artifact: ArtifactId,
    pub freshness: Freshness,
}

impl ArtifactRequest {
    pub fn new(artifact: ArtifactId) -> Self {
        Self {
            artifact,
            freshness: Freshness::Cached,
        }
    }

    pub fn refresh(artifact: ArtifactId) -> Self {
        Self {
            artifact,
            freshness: Freshness::Refresh,
        }
    }
}

/// Where the bytes came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchedFrom {
    Cache,
    Peer(SocketAddr),
    Server { id: i64, name: String },
}

/// A successfully materialised artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fetched {
    pub key: SafeRelativePath,
    pub size: u64,
    /// SHA-256 of the received bytes; not recomputed for cache hits.
    pub sha256: Option<ContentHash>,
    pub source: FetchedFrom,
}

type SharedFetch = Shared<BoxFuture<'static, FetchResult<Fetched>>>;

/// At most one job in flight per source.
#[derive(Default)]
struct SourceLeases {
    slots: DashMap<SourceKey, Arc<Semaphore>>,
}

impl SourceLeases {
    async fn acquire(&self, key: SourceKey) -> FetchResult<OwnedSemaphorePermit> {
        let slot = Arc::clone(
            self.slots
                .entry(key)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .value(),
        );
        slot.acquire_owned()
            .await
            .map_err(|_| FetchError::Cancelled)
    }
}

struct Inner {
    catalog: Catalog,
    cache: CacheStore,
    peers: Arc<PeerDirectory>,
    peer_client: PeerClient,
    clients: HttpClients,
    trusted_keys: TrustedKeys,
    config: FetchConfig,
    workers: Arc<Semaphore>,
    leases: SourceLeases,
    in_flight: DashMap<SafeRelativePath, SharedFetch>,
    cancel: CancellationToken,
}

/// Multi-source download coordinator. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        catalog: Catalog,
        cache: CacheStore,
        peers: Arc<PeerDirectory>,
        trusted_keys: TrustedKeys,
        config: FetchConfig,
    ) -> FetchResult<Self> {
        let peer_client = PeerClient::new(config.connect_timeout(), config.probe_timeout())
            .map_err(|e| FetchError::LocalResource(format!("peer client: {e}")))?;
        let clients = HttpClients::new(&config)?;
        Ok(Self {
            inner: Arc::new(Inner {
                catalog,
                cache,
                peers,
                peer_client,
                clients,
                trusted_keys,
                workers: Arc::new(Semaphore::new(config.workers.max(1))),
                config,
                leases: SourceLeases::default(),
                in_flight: DashMap::new(),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn peers(&self) -> &Arc<PeerDirectory> {
        &self.inner.peers
    }

    /// Width of the worker pool.
    pub fn workers(&self) -> usize {
        self.inner.config.workers.max(1)
    }

    /// Artifacts currently being fetched.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Stop accepting work. Queued jobs end as `Cancelled`; running attempts
    /// finish or hit their timeout.
    pub fn shutdown(&self) {
        tracing::info!("Download coordinator shutting down");
        self.inner.cancel.cancel();
    }

    /// Materialise one artifact in the cache.
    ///
    /// Concurrent requests for the same artifact share a single job and all
    /// observe its outcome.
    pub async fn fetch(&self, request: ArtifactRequest) -> FetchResult<Fetched> {
        if self.inner.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let key = request.artifact.cache_key();

        let shared = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                COALESCED_WAITERS.inc();
                tracing::debug!(key = %key, "Joining in-flight fetch");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let inner = Arc::clone(&self.inner);
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let result = inner.run(request).await;
                    inner.in_flight.remove(&task_key);
                    result
                });
                let shared = async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(FetchError::LocalResource(format!("fetch task failed: {e}")))
                    })
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        };
        shared.await
    }

    /// Fetch several artifacts; results are in request order.
    pub async fn fetch_all(&self, requests: Vec<ArtifactRequest>) -> Vec<FetchResult<Fetched>> {
        join_all(requests.into_iter().map(|r| self.fetch(r))).await
    }
}

impl Inner {
    #[instrument(skip_all, fields(artifact = %request.artifact))]
    async fn run(&self, request: ArtifactRequest) -> FetchResult<Fetched> {
        let artifact = &request.artifact;
        let media = self.catalog_media(artifact).await?;
        let key = artifact.cache_key();

        if request.freshness == Freshness::Cached
            && let Some(hit) = self.cache_hit(artifact, &key).await?
        {
            return Ok(hit);
        }

        let _worker = tokio::select! {
            permit = Arc::clone(&self.workers).acquire_owned() => {
                permit.map_err(|_| FetchError::Cancelled)?
            }
            _ = self.cancel.cancelled() => {
                tracing::debug!("Fetch cancelled while queued");
                return Err(FetchError::Cancelled);
            }
        };

        let candidates = self.candidates(&request, media.as_ref()).await?;
        let mut job = DownloadJob::new(artifact.clone(), candidates);
        tracing::debug!(job = %job.id, candidates = job.candidates().len(), "Job created");

        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let Some(candidate) = job.assign_next() else {
                break;
            };
            let _lease = tokio::select! {
                lease = self.leases.acquire(candidate.key()) => lease?,
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            };

            job.transition(JobState::Fetching);
            let tier = candidate.tier().as_str();
            match self.attempt(&mut job, &candidate).await {
                Ok(fetched) => {
                    FETCH_ATTEMPTS.with_label_values(&[tier, "committed"]).inc();
                    BYTES_COMMITTED.inc_by(fetched.size);
                    self.after_success(&candidate).await;
                    tracing::info!(
                        source = %candidate,
                        size = fetched.size,
                        "Artifact committed"
                    );
                    return Ok(fetched);
                }
                Err(error) => {
                    FETCH_ATTEMPTS.with_label_values(&[tier, outcome_label(&error)]).inc();
                    tracing::warn!(source = %candidate, error = %error, "Fetch attempt failed");
                    self.after_failure(&candidate, &error).await;
                    let fatal = error.is_local_fault();
                    job.record_failure(&candidate, error);
                    if fatal {
                        return Err(FetchError::Failed(job.fail(true)));
                    }
                }
            }
        }

        let failure = job.fail(false);
        tracing::warn!(kind = failure.kind.as_str(), attempts = failure.attempts.len(), "Fetch failed");
        Err(FetchError::Failed(failure))
    }

    async fn cache_hit(
        &self,
        artifact: &ArtifactId,
        key: &SafeRelativePath,
    ) -> FetchResult<Option<Fetched>> {
        let Some(entry) = self.cache.stat(key).await? else {
            return Ok(None);
        };
        if artifact.size.is_some_and(|size| size != entry.size) {
            tracing::debug!(key = %key, "Cached copy has the wrong size, refetching");
            return Ok(None);
        }
        if let Err(e) = self.cache.touch(key).await {
            tracing::debug!(key = %key, error = %e, "Failed to record cache access");
        }
        CACHE_HITS.inc();
        Ok(Some(Fetched {
            key: key.clone(),
            size: entry.size,
            sha256: None,
            source: FetchedFrom::Cache,
        }))
    }

    /// The catalog row of the artifact's media. The identity the request
    /// places the artifact under must be the one the catalog holds, otherwise
    /// the bytes would land in another media's subtree.
    async fn catalog_media(&self, artifact: &ArtifactId) -> FetchResult<Option<MediaRow>> {
        let media = match self.catalog.get_media(&artifact.media.key).await {
            Ok(media) => media,
            Err(CatalogError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let identity = media.identity()?;
        if identity != artifact.media {
            return Err(FetchError::PathSafetyViolation(format!(
                "media {} lives under {}, not {}",
                artifact.media.key,
                identity.subtree(),
                artifact.media.subtree()
            )));
        }
        Ok(Some(media))
    }

    /// Peers first (unless refreshing), then catalog servers in rank order.
    async fn candidates(
        &self,
        request: &ArtifactRequest,
        media: Option<&MediaRow>,
    ) -> FetchResult<Vec<Candidate>> {
        let artifact = &request.artifact;
        let mut candidates = Vec::new();

        if request.freshness == Freshness::Cached {
            let peers = self.peers.have(artifact).await;
            let peers = if self.config.probe_peers && !peers.is_empty() {
                self.probe(artifact, peers).await
            } else {
                peers
            };
            candidates.extend(peers.into_iter().map(Candidate::Peer));
        }

        match media {
            Some(media) => {
                for server in self.catalog.ranked_servers_for(&artifact.media.key).await? {
                    let location = location_of(media, &server)?.join(&artifact.path);
                    candidates.push(Candidate::Server { server, location });
                }
            }
            None if candidates.is_empty() => {
                return Err(FetchError::NotFound(format!(
                    "media {} is not in the catalog",
                    artifact.media.key
                )));
            }
            None => {}
        }
        Ok(candidates)
    }

    /// Keep the peers that confirm they hold the artifact.
    async fn probe(&self, artifact: &ArtifactId, peers: Vec<PeerCandidate>) -> Vec<PeerCandidate> {
        let key = artifact.cache_key();
        let probes = peers.into_iter().map(|peer| {
            let key = &key;
            async move {
                match self.peer_client.probe_have(peer.address, key).await {
                    Ok(Some(size)) if artifact.size.is_none_or(|s| s == size) => Some(peer),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::debug!(peer = %peer.address, error = %e, "Have probe failed");
                        None
                    }
                }
            }
        });
        join_all(probes).await.into_iter().flatten().collect()
    }

    /// Fetch from one candidate, verify and commit.
    async fn attempt(&self, job: &mut DownloadJob, candidate: &Candidate) -> FetchResult<Fetched> {
        let key = job.artifact.cache_key();
        let stall = self.config.stall_timeout();
        let mut staged = self.cache.stage(&key, job.artifact.size).await?;

        let source = match candidate {
            Candidate::Peer(peer) => {
                if self.peers.is_blacklisted(peer.address).await {
                    return Err(FetchError::PeerUntrusted(peer.address.to_string()));
                }
                let response =
                    tokio::time::timeout(stall, self.peer_client.fetch(peer.address, &key))
                        .await
                        .map_err(|_| {
                            FetchError::SourceUnavailable(format!(
                                "peer {} did not answer",
                                peer.address
                            ))
                        })??;
                transfer::stream_into(response, &mut staged, stall).await?;
                FetchedFrom::Peer(peer.address)
            }
            Candidate::Server { server, location } => {
                match location {
                    Location::Url(url) => {
                        let client = self.clients.for_mode(server.ip_mode().unwrap_or_default());
                        let response = transfer::get(client, url, stall).await?;
                        transfer::stream_into(response, &mut staged, stall).await?;
                    }
                    Location::Path(path) => transfer::copy_file(path, &mut staged).await?,
                }
                FetchedFrom::Server {
                    id: server.id,
                    name: server.name.clone(),
                }
            }
        };

        let staged = staged.finish().await?;
        job.transition(JobState::Verifying);
        if let Err(e) = verify_artifact(
            &job.artifact,
            staged.size(),
            staged.sha256(),
            &self.trusted_keys,
        ) {
            staged.discard().await;
            return Err(e);
        }

        let sha256 = staged.sha256();
        let size = staged.commit().await?;
        job.transition(JobState::Committed);
        Ok(Fetched {
            key,
            size,
            sha256: Some(sha256),
            source,
        })
    }

    async fn after_success(&self, candidate: &Candidate) {
        match candidate {
            Candidate::Peer(peer) => self.peers.mark_trusted(peer.address).await,
            Candidate::Server { server, .. } => {
                if let Err(e) = self.catalog.record_outcome(server.id, true).await {
                    tracing::warn!(server = %server.name, error = %e, "Failed to record outcome");
                }
            }
        }
    }

    async fn after_failure(&self, candidate: &Candidate, error: &FetchError) {
        if error.is_local_fault() {
            return;
        }
        match candidate {
            Candidate::Peer(peer) => {
                if let FetchError::IntegrityFailure(reason) = error {
                    PEERS_BLACKLISTED.inc();
                    if let Err(e) = self.peers.blacklist(peer.address, reason.clone()).await {
                        tracing::error!(peer = %peer.address, error = %e, "Failed to persist blacklist");
                    }
                }
            }
            Candidate::Server { server, .. } => {
                if let Err(e) = self.catalog.record_outcome(server.id, false).await {
                    tracing::warn!(server = %server.name, error = %e, "Failed to record outcome");
                }
            }
        }
    }
}

fn outcome_label(error: &FetchError) -> &'static str {
    match error {
        FetchError::NotFound(_) => "not_found",
        FetchError::IntegrityFailure(_) => "integrity_failure",
        FetchError::PeerUntrusted(_) => "untrusted",
        FetchError::LocalResource(_) | FetchError::Cancelled => "local_fault",
        _ => "unavailable",
    }
}
