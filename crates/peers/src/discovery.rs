//! UDP broadcast discovery.
//!
//! Every daemon binds the discovery port, broadcasts its own [`Announce`] on
//! a jittered interval and records the announces it hears in the
//! [`PeerDirectory`]. A newcomer gets a unicast reply so it learns the
//! network without waiting a full interval.

use crate::directory::{AnnounceOutcome, PeerDirectory};
use crate::error::{PeerError, PeerResult};
use crate::wire::{Announce, Capability};
use async_trait::async_trait;
use pkgmesh_core::config::PeerConfig;
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Largest announce we accept.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Relative jitter applied to the broadcast interval.
const BROADCAST_JITTER: f64 = 0.3;

/// Supplies the capabilities advertised in our announces.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    async fn capabilities(&self) -> Vec<Capability>;
}

/// A fixed capability list.
#[async_trait]
impl CapabilitySource for Vec<Capability> {
    async fn capabilities(&self) -> Vec<Capability> {
        self.clone()
    }
}

/// `base` scaled by a random factor in `[1 - factor, 1 + factor]`.
pub fn jittered(base: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return base;
    }
    let scale = rand::rng().random_range((1.0 - factor)..=(1.0 + factor));
    base.mul_f64(scale)
}

/// Random delay in `[0, max]`.
fn reply_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// The discovery listener and broadcaster.
pub struct Discovery {
    directory: Arc<PeerDirectory>,
    capabilities: Arc<dyn CapabilitySource>,
    config: PeerConfig,
    http_port: u16,
}

impl Discovery {
    pub fn new(
        directory: Arc<PeerDirectory>,
        capabilities: Arc<dyn CapabilitySource>,
        config: PeerConfig,
        http_port: u16,
    ) -> Self {
        Self {
            directory,
            capabilities,
            config,
            http_port,
        }
    }

    /// The announce we currently send.
    pub async fn own_announce(&self) -> Announce {
        Announce::new(
            self.directory.node_id(),
            self.http_port,
            self.capabilities.capabilities().await,
        )
    }

    /// Delay before our first broadcast, so machines booted together do not
    /// announce in lockstep.
    fn startup_delay(&self) -> Duration {
        reply_delay(self.config.announce_jitter())
    }

    fn broadcast_target(&self) -> PeerResult<SocketAddr> {
        let ip: IpAddr = self.config.broadcast_address.parse().map_err(|_| {
            PeerError::InvalidAddress(format!(
                "broadcast address {:?} is not an IP address",
                self.config.broadcast_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.config.discovery_port))
    }

    /// Bind the discovery port and run until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> PeerResult<()> {
        let target = self.broadcast_target()?;
        let socket = UdpSocket::bind(("0.0.0.0", self.config.discovery_port)).await?;
        socket.set_broadcast(true)?;
        tracing::info!(
            port = self.config.discovery_port,
            broadcast = %target,
            "Peer discovery listening"
        );
        self.run_on(Arc::new(socket), target, cancel).await
    }

    /// Run the discovery loop on an already bound socket.
    pub async fn run_on(
        &self,
        socket: Arc<UdpSocket>,
        target: SocketAddr,
        cancel: CancellationToken,
    ) -> PeerResult<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut next_broadcast = Instant::now() + self.startup_delay();
        let prune_every = (self.directory.ttl() / 3).max(Duration::from_secs(1));
        let mut prune = tokio::time::interval(prune_every);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Peer discovery stopped");
                    return Ok(());
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => self.handle_datagram(&socket, &buf[..len], src).await,
                    Err(e) => tracing::warn!(error = %e, "Discovery receive failed"),
                },
                _ = tokio::time::sleep_until(next_broadcast) => {
                    self.broadcast(&socket, target).await;
                    next_broadcast = Instant::now()
                        + jittered(self.config.announce_interval(), BROADCAST_JITTER);
                }
                _ = prune.tick() => {
                    let removed = self.directory.prune().await;
                    if removed > 0 {
                        tracing::debug!(removed, "Pruned expired peers");
                    }
                }
            }
        }
    }

    async fn broadcast(&self, socket: &UdpSocket, target: SocketAddr) {
        let announce = self.own_announce().await;
        match serde_json::to_vec(&announce) {
            Ok(payload) => {
                if let Err(e) = socket.send_to(&payload, target).await {
                    tracing::warn!(target = %target, error = %e, "Announce broadcast failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode announce"),
        }
    }

    async fn handle_datagram(&self, socket: &Arc<UdpSocket>, data: &[u8], src: SocketAddr) {
        let announce: Announce = match serde_json::from_slice(data) {
            Ok(announce) => announce,
            Err(e) => {
                tracing::debug!(source = %src, error = %e, "Ignoring malformed announce");
                return;
            }
        };
        if let Err(reason) = announce.validate() {
            tracing::debug!(source = %src, reason = %reason, "Ignoring invalid announce");
            return;
        }

        let address = SocketAddr::new(src.ip(), announce.port);
        if self.directory.announce(address, &announce).await != AnnounceOutcome::New {
            return;
        }

        // Introduce ourselves to the newcomer after a random delay.
        let reply = match serde_json::to_vec(&self.own_announce().await) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode announce");
                return;
            }
        };
        let delay = reply_delay(self.config.announce_jitter());
        let socket = Arc::clone(socket);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = socket.send_to(&reply, src).await {
                tracing::debug!(peer = %src, error = %e, "Announce reply failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::BlacklistStore;

    #[test]
    fn test_jittered_bounds() {
        let base = Duration::from_secs(60);
        for _ in 0..100 {
            let d = jittered(base, 0.3);
            assert!(d >= Duration::from_secs(42) && d <= Duration::from_secs(78));
        }
        assert_eq!(jittered(base, 0.0), base);
        assert_eq!(reply_delay(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_first_broadcast_is_jittered() {
        let directory = Arc::new(
            PeerDirectory::new("node-a", Duration::from_secs(180), BlacklistStore::ephemeral())
                .await
                .unwrap(),
        );
        let config = PeerConfig {
            announce_jitter_ms: 2000,
            ..PeerConfig::default()
        };
        let discovery = Discovery::new(directory, Arc::new(Vec::<Capability>::new()), config, 9876);

        let delays: Vec<_> = (0..50).map(|_| discovery.startup_delay()).collect();
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(2)));
        assert!(delays.iter().any(|d| !d.is_zero()));
        assert!(delays.iter().any(|d| *d != delays[0]));
    }

    #[tokio::test]
    async fn test_broadcast_and_reply() {
        let directory = Arc::new(
            PeerDirectory::new("node-a", Duration::from_secs(180), BlacklistStore::ephemeral())
                .await
                .unwrap(),
        );
        let config = PeerConfig {
            announce_jitter_ms: 0,
            ..PeerConfig::default()
        };
        let discovery = Discovery::new(
            Arc::clone(&directory),
            Arc::new(vec![Capability::new("9", "x86_64")]),
            config,
            9876,
        );

        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let local = socket.local_addr().unwrap();
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote.local_addr().unwrap();

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            let socket = Arc::clone(&socket);
            tokio::spawn(async move { discovery.run_on(socket, remote_addr, cancel).await })
        };

        // No jitter configured: the first broadcast goes out immediately.
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), remote.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let announce: Announce = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(announce.node_id, "node-a");
        assert_eq!(announce.port, 9876);
        assert_eq!(announce.capabilities, vec![Capability::new("9", "x86_64")]);

        // A newcomer is recorded under its HTTP port and gets a reply.
        let hello = Announce::new("node-b", 9999, vec![Capability::new("9", "x86_64")]);
        remote
            .send_to(&serde_json::to_vec(&hello).unwrap(), local)
            .await
            .unwrap();
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), remote.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply: Announce = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(reply.node_id, "node-a");

        let records = directory.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, SocketAddr::from(([127, 0, 0, 1], 9999)));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_garbage_is_ignored() {
        let directory = Arc::new(
            PeerDirectory::new("node-a", Duration::from_secs(180), BlacklistStore::ephemeral())
                .await
                .unwrap(),
        );
        let discovery = Discovery::new(
            Arc::clone(&directory),
            Arc::new(Vec::<Capability>::new()),
            PeerConfig::default(),
            9876,
        );
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let src = SocketAddr::from(([127, 0, 0, 1], 40000));

        discovery.handle_datagram(&socket, b"not json", src).await;
        let zero_port = serde_json::to_vec(&Announce::new("node-b", 0, vec![])).unwrap();
        discovery.handle_datagram(&socket, &zero_port, src).await;
        let own = serde_json::to_vec(&Announce::new("node-a", 9876, vec![])).unwrap();
        discovery.handle_datagram(&socket, &own, src).await;

        assert_eq!(directory.live_count().await, 0);
    }
}
