//! Live table of LAN peers and their trust state.

use crate::blacklist::{BlacklistEntry, BlacklistStore};
use crate::error::{PeerError, PeerResult};
use crate::wire::{Announce, Capability, PeerRecord, PeerState};
use pkgmesh_core::{ArtifactId, MediaKey};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// What an announce did to the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// First sighting (or first since expiry).
    New,
    /// Known peer, TTL refreshed.
    Refreshed,
    /// Our own announce, or a blacklisted sender.
    Ignored,
}

/// A peer eligible to serve an artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerCandidate {
    pub address: SocketAddr,
    pub node_id: String,
    pub trusted: bool,
}

#[derive(Debug)]
struct LiveEntry {
    node_id: String,
    capabilities: Vec<Capability>,
    last_seen: Instant,
    last_seen_wall: OffsetDateTime,
    trusted: bool,
}

#[derive(Debug, Default)]
struct Table {
    live: HashMap<SocketAddr, LiveEntry>,
    blacklisted: BTreeMap<IpAddr, BlacklistEntry>,
}

impl Table {
    /// The blacklist entry covering a host or the node announcing from it.
    fn ban(&self, address: &SocketAddr, node_id: Option<&str>) -> Option<&BlacklistEntry> {
        self.blacklisted.get(&address.ip()).or_else(|| {
            let node_id = node_id?;
            self.blacklisted
                .values()
                .find(|e| e.node_id.as_deref() == Some(node_id))
        })
    }

    /// Blacklist check for an address, using the node id it last announced.
    fn banned(&self, address: &SocketAddr) -> bool {
        let node_id = self.live.get(address).map(|e| e.node_id.as_str());
        self.ban(address, node_id).is_some()
    }
}

/// Shared peer table. The discovery listener writes, the coordinator reads.
#[derive(Debug)]
pub struct PeerDirectory {
    node_id: String,
    ttl: Duration,
    table: RwLock<Table>,
    store: BlacklistStore,
    rotation: AtomicUsize,
}

impl PeerDirectory {
    /// Create a directory, loading the persisted blacklist.
    pub async fn new(
        node_id: impl Into<String>,
        ttl: Duration,
        store: BlacklistStore,
    ) -> PeerResult<Self> {
        let blacklisted = store.load().await?;
        if !blacklisted.is_empty() {
            tracing::info!(count = blacklisted.len(), "Loaded peer blacklist");
        }
        Ok(Self {
            node_id: node_id.into(),
            ttl,
            table: RwLock::new(Table {
                live: HashMap::new(),
                blacklisted,
            }),
            store,
            rotation: AtomicUsize::new(0),
        })
    }

    /// Our own node id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_live(&self, entry: &LiveEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_seen) <= self.ttl
    }

    /// Record or refresh a peer from its announce.
    pub async fn announce(&self, address: SocketAddr, announce: &Announce) -> AnnounceOutcome {
        if announce.node_id == self.node_id {
            return AnnounceOutcome::Ignored;
        }
        let now = Instant::now();
        let mut table = self.table.write().await;
        let blacklisted = table.ban(&address, Some(announce.node_id.as_str())).is_some();

        let outcome = match table.live.get_mut(&address) {
            Some(entry) if self.is_live(entry, now) => {
                // A different node on the same address starts from scratch.
                if entry.node_id != announce.node_id {
                    entry.node_id = announce.node_id.clone();
                    entry.trusted = false;
                }
                entry.capabilities = announce.capabilities.clone();
                entry.last_seen = now;
                entry.last_seen_wall = OffsetDateTime::now_utc();
                AnnounceOutcome::Refreshed
            }
            _ => {
                table.live.insert(
                    address,
                    LiveEntry {
                        node_id: announce.node_id.clone(),
                        capabilities: announce.capabilities.clone(),
                        last_seen: now,
                        last_seen_wall: OffsetDateTime::now_utc(),
                        trusted: false,
                    },
                );
                if !blacklisted {
                    tracing::info!(peer = %address, node_id = %announce.node_id, "Peer discovered");
                }
                AnnounceOutcome::New
            }
        };

        if blacklisted {
            AnnounceOutcome::Ignored
        } else {
            outcome
        }
    }

    /// Non-expired, non-blacklisted peers serving the artifact's
    /// `(version, architecture)`. Trusted peers come first; each group is
    /// rotated on every call to spread load.
    pub async fn have(&self, artifact: &ArtifactId) -> Vec<PeerCandidate> {
        self.serving(&artifact.media.key).await
    }

    /// Same as [`have`](Self::have), by media key.
    pub async fn serving(&self, media: &MediaKey) -> Vec<PeerCandidate> {
        let now = Instant::now();
        let table = self.table.read().await;
        let mut trusted = Vec::new();
        let mut announced = Vec::new();

        for (address, entry) in &table.live {
            if !self.is_live(entry, now)
                || table.ban(address, Some(entry.node_id.as_str())).is_some()
                || !entry.capabilities.iter().any(|c| c.covers(media))
            {
                continue;
            }
            let candidate = PeerCandidate {
                address: *address,
                node_id: entry.node_id.clone(),
                trusted: entry.trusted,
            };
            if entry.trusted {
                trusted.push(candidate);
            } else {
                announced.push(candidate);
            }
        }
        drop(table);

        let turn = self.rotation.fetch_add(1, Ordering::Relaxed);
        for group in [&mut trusted, &mut announced] {
            group.sort_by_key(|c| c.address);
            if !group.is_empty() {
                let shift = turn % group.len();
                group.rotate_left(shift);
            }
        }
        trusted.extend(announced);
        trusted
    }

    /// Promote a peer after it served a verified artifact.
    pub async fn mark_trusted(&self, address: SocketAddr) {
        let mut table = self.table.write().await;
        if table.banned(&address) {
            return;
        }
        if let Some(entry) = table.live.get_mut(&address)
            && !entry.trusted
        {
            entry.trusted = true;
            tracing::debug!(peer = %address, "Peer trusted");
        }
    }

    /// Blacklist the host behind `address`, whatever port it announces
    /// next, and persist the blacklist.
    pub async fn blacklist(&self, address: SocketAddr, reason: impl Into<String>) -> PeerResult<()> {
        let reason = reason.into();
        let snapshot = {
            let mut table = self.table.write().await;
            let node_id = table.live.get(&address).map(|e| e.node_id.clone());
            for (_, entry) in table.live.iter_mut().filter(|(a, _)| a.ip() == address.ip()) {
                entry.trusted = false;
            }
            table.blacklisted.insert(
                address.ip(),
                BlacklistEntry {
                    address,
                    reason: reason.clone(),
                    since: OffsetDateTime::now_utc(),
                    node_id,
                },
            );
            table.blacklisted.clone()
        };
        tracing::warn!(peer = %address, reason = %reason, "Peer blacklisted");
        self.store.save(&snapshot).await
    }

    /// Lift the blacklist entry covering `address`. Live peers on that host
    /// go straight back to trusted.
    pub async fn unblacklist(&self, address: SocketAddr) -> PeerResult<()> {
        let snapshot = {
            let mut table = self.table.write().await;
            let node_id = table.live.get(&address).map(|e| e.node_id.clone());
            let key = match table.ban(&address, node_id.as_deref()) {
                Some(entry) => entry.address.ip(),
                None => return Err(PeerError::UnknownPeer(address)),
            };
            table.blacklisted.remove(&key);
            for (_, entry) in table.live.iter_mut().filter(|(a, _)| a.ip() == key) {
                entry.trusted = true;
            }
            table.blacklisted.clone()
        };
        tracing::info!(peer = %address, "Peer removed from blacklist");
        self.store.save(&snapshot).await
    }

    pub async fn is_blacklisted(&self, address: SocketAddr) -> bool {
        self.table.read().await.banned(&address)
    }

    /// Current state of a peer; `None` for peers never seen or expired and
    /// not blacklisted.
    pub async fn state(&self, address: SocketAddr) -> Option<PeerState> {
        let now = Instant::now();
        let table = self.table.read().await;
        if table.banned(&address) {
            return Some(PeerState::Blacklisted);
        }
        table
            .live
            .get(&address)
            .filter(|e| self.is_live(e, now))
            .map(|e| {
                if e.trusted {
                    PeerState::Trusted
                } else {
                    PeerState::Announced
                }
            })
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut table = self.table.write().await;
        let before = table.live.len();
        table.live.retain(|address, entry| {
            let keep = now.saturating_duration_since(entry.last_seen) <= self.ttl;
            if !keep {
                tracing::debug!(peer = %address, "Peer expired");
            }
            keep
        });
        before - table.live.len()
    }

    /// Number of live, non-blacklisted peers.
    pub async fn live_count(&self) -> usize {
        let now = Instant::now();
        let table = self.table.read().await;
        table
            .live
            .iter()
            .filter(|(a, e)| {
                self.is_live(e, now) && table.ban(a, Some(e.node_id.as_str())).is_none()
            })
            .count()
    }

    /// Every live peer plus every blacklisted host, sorted by address.
    pub async fn records(&self) -> Vec<PeerRecord> {
        let now = Instant::now();
        let table = self.table.read().await;
        let mut records: BTreeMap<SocketAddr, PeerRecord> = BTreeMap::new();

        for (address, entry) in &table.live {
            if !self.is_live(entry, now) {
                continue;
            }
            let ban = table.ban(address, Some(entry.node_id.as_str()));
            let state = match (ban, entry.trusted) {
                (Some(_), _) => PeerState::Blacklisted,
                (None, true) => PeerState::Trusted,
                (None, false) => PeerState::Announced,
            };
            records.insert(
                *address,
                PeerRecord {
                    address: *address,
                    node_id: Some(entry.node_id.clone()),
                    capabilities: entry.capabilities.clone(),
                    last_seen: Some(entry.last_seen_wall),
                    state,
                    reason: ban.map(|b| b.reason.clone()),
                },
            );
        }
        for entry in table.blacklisted.values() {
            records.entry(entry.address).or_insert_with(|| PeerRecord {
                address: entry.address,
                node_id: entry.node_id.clone(),
                capabilities: Vec::new(),
                last_seen: None,
                state: PeerState::Blacklisted,
                reason: Some(entry.reason.clone()),
            });
        }
        records.into_values().collect()
    }
}
