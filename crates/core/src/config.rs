//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default HTTP port for the control/data plane.
pub const DEFAULT_HTTP_PORT: u16 = 9876;
/// Default UDP port for peer discovery.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9878;
/// HTTP port used in development mode.
pub const DEV_HTTP_PORT: u16 = 9880;
/// UDP port used in development mode.
pub const DEV_DISCOVERY_PORT: u16 = 9879;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (e.g., "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Expose /metrics for Prometheus scraping.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            metrics_enabled: true,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Catalog (SQLite) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Path of the SQLite database.
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("/var/lib/pkgmesh/catalog.db")
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

/// Artifact cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root; artifacts live under `<root>/medias`.
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
    /// Unreferenced files older than this are removed after each predownload run.
    #[serde(default = "default_cleanup_max_age_days")]
    pub cleanup_max_age_days: u64,
    /// Per-media byte quotas, keyed by `<version>/<arch>/<short_name>`.
    #[serde(default)]
    pub quotas: BTreeMap<String, u64>,
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("/var/cache/pkgmesh")
}

fn default_cleanup_max_age_days() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            cleanup_max_age_days: default_cleanup_max_age_days(),
            quotas: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_days.saturating_mul(86_400))
    }
}

/// Peer discovery configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Run UDP discovery at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// UDP port for announce broadcasts.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Destination of outbound broadcasts.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// Base interval between broadcasts.
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
    /// Upper bound of the random delay before replying to a newcomer.
    #[serde(default = "default_announce_jitter_ms")]
    pub announce_jitter_ms: u64,
    /// Seconds after the last announce before a peer is forgotten.
    #[serde(default = "default_peer_ttl_secs")]
    pub ttl_secs: u64,
    /// JSON file holding the persisted blacklist.
    #[serde(default = "default_blacklist_path")]
    pub blacklist_path: PathBuf,
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}

fn default_announce_interval_secs() -> u64 {
    60
}

fn default_announce_jitter_ms() -> u64 {
    5_000
}

fn default_peer_ttl_secs() -> u64 {
    180
}

fn default_blacklist_path() -> PathBuf {
    PathBuf::from("/var/lib/pkgmesh/peer-blacklist.json")
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            discovery_port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
            announce_interval_secs: default_announce_interval_secs(),
            announce_jitter_ms: default_announce_jitter_ms(),
            ttl_secs: default_peer_ttl_secs(),
            blacklist_path: default_blacklist_path(),
        }
    }
}

impl PeerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn announce_jitter(&self) -> Duration {
        Duration::from_millis(self.announce_jitter_ms)
    }

    /// Validate peer configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_secs == 0 {
            return Err("peers.ttl_secs must be greater than 0".to_string());
        }
        if self.announce_interval_secs == 0 {
            return Err("peers.announce_interval_secs must be greater than 0".to_string());
        }
        if self.announce_interval_secs >= self.ttl_secs {
            return Err(format!(
                "peers.announce_interval_secs ({}) must be shorter than peers.ttl_secs ({}), \
                 otherwise peers expire between announces",
                self.announce_interval_secs, self.ttl_secs
            ));
        }
        Ok(())
    }
}

/// Download coordinator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Width of the worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Connect timeout per attempt.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Abort an attempt when no bytes arrive for this long.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    /// Confirm peer candidates with `POST /api/have` before fetching.
    #[serde(default = "default_true")]
    pub probe_peers: bool,
    /// Timeout of each have probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_stall_timeout_secs() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    1_500
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            connect_timeout_secs: default_connect_timeout_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            probe_peers: true,
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl FetchConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validate fetch configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("fetch.workers must be at least 1".to_string());
        }
        if self.connect_timeout_secs == 0 || self.stall_timeout_secs == 0 {
            return Err("fetch timeouts must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Replication and background scheduling configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Run the background scheduler.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scheduler tick; job times are quantised to it.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Base interval of the metadata check.
    #[serde(default = "default_metadata_interval_secs")]
    pub metadata_interval_secs: u64,
    /// Base interval of the predownload (replication) run.
    #[serde(default = "default_predownload_interval_secs")]
    pub predownload_interval_secs: u64,
    /// Relative jitter applied to every interval (0.3 = ±30%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Byte budget of a single predownload run.
    #[serde(default = "default_max_predownload_bytes")]
    pub max_predownload_bytes: u64,
    /// Keep only the newest version of each package.
    #[serde(default = "default_true")]
    pub latest_only: bool,
    /// Follow recommended (weak) dependencies in the closure.
    #[serde(default = "default_true")]
    pub include_recommends: bool,
    /// Metadata files synchronised for every enabled media.
    #[serde(default = "default_metadata_files")]
    pub metadata_files: Vec<String>,
    /// Skip background work while the 1-minute load average is above this.
    #[serde(default = "default_max_load")]
    pub max_load: f64,
    /// Skip background work while network traffic is above this (KB/s).
    #[serde(default = "default_max_net_kbps")]
    pub max_net_kbps: f64,
    /// Seed membership per media (`<version>/<arch>/<short_name>` to package names).
    #[serde(default)]
    pub seed_members: BTreeMap<String, Vec<String>>,
}

fn default_tick_secs() -> u64 {
    60
}

fn default_metadata_interval_secs() -> u64 {
    3600
}

fn default_predownload_interval_secs() -> u64 {
    7200
}

fn default_jitter_factor() -> f64 {
    0.30
}

fn default_max_predownload_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_metadata_files() -> Vec<String> {
    vec![
        "media_info/synthesis.hdlist.cz".to_string(),
        "media_info/MD5SUM".to_string(),
    ]
}

fn default_max_load() -> f64 {
    0.5
}

fn default_max_net_kbps() -> f64 {
    100.0
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_tick_secs(),
            metadata_interval_secs: default_metadata_interval_secs(),
            predownload_interval_secs: default_predownload_interval_secs(),
            jitter_factor: default_jitter_factor(),
            max_predownload_bytes: default_max_predownload_bytes(),
            latest_only: true,
            include_recommends: true,
            metadata_files: default_metadata_files(),
            max_load: default_max_load(),
            max_net_kbps: default_max_net_kbps(),
            seed_members: BTreeMap::new(),
        }
    }
}

impl ReplicationConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    /// Validate replication configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_secs == 0 {
            return Err("replication.tick_secs must be greater than 0".to_string());
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(format!(
                "replication.jitter_factor must be in [0, 1), got {}",
                self.jitter_factor
            ));
        }
        for (name, interval) in [
            ("metadata_interval_secs", self.metadata_interval_secs),
            ("predownload_interval_secs", self.predownload_interval_secs),
        ] {
            if interval < self.tick_secs {
                return Err(format!(
                    "replication.{name} ({interval}) must be at least tick_secs ({})",
                    self.tick_secs
                ));
            }
        }
        Ok(())
    }
}

/// Signature verification configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Trusted public keys in `keyname:base64` format.
    #[serde(default)]
    pub trusted_keys: Vec<String>,
    /// Reject checksummed artifacts that carry no valid signature from a
    /// trusted key. Signatures come from the media index.
    #[serde(default)]
    pub require_signatures: bool,
}

impl SigningConfig {
    /// Validate signing configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.require_signatures && self.trusted_keys.is_empty() {
            return Err(
                "signing.require_signatures is set but no trusted_keys are configured".to_string(),
            );
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Development mode (shorter intervals, separate ports and paths).
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub peers: PeerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub signing: SigningConfig,
}

impl AppConfig {
    /// Defaults for development: separate ports, local state, short intervals.
    pub fn development() -> Self {
        let state = PathBuf::from("./dev-state");
        Self {
            dev_mode: true,
            server: ServerConfig {
                port: DEV_HTTP_PORT,
                ..ServerConfig::default()
            },
            catalog: CatalogConfig {
                path: state.join("catalog.db"),
            },
            cache: CacheConfig {
                root: state.join("cache"),
                ..CacheConfig::default()
            },
            peers: PeerConfig {
                discovery_port: DEV_DISCOVERY_PORT,
                announce_interval_secs: 15,
                ttl_secs: 45,
                blacklist_path: state.join("peer-blacklist.json"),
                ..PeerConfig::default()
            },
            fetch: FetchConfig::default(),
            replication: ReplicationConfig {
                tick_secs: 10,
                metadata_interval_secs: 60,
                predownload_interval_secs: 120,
                ..ReplicationConfig::default()
            },
            signing: SigningConfig::default(),
        }
    }

    /// Create a test configuration rooted in `dir`.
    ///
    /// **For testing only.** Discovery and the scheduler are disabled.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        let mut config = Self::development();
        config.catalog.path = dir.join("catalog.db");
        config.cache.root = dir.join("cache");
        config.peers.enabled = false;
        config.peers.blacklist_path = dir.join("peer-blacklist.json");
        config.replication.enabled = false;
        config
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.peers.validate()?;
        self.fetch.validate()?;
        self.replication.validate()?;
        self.signing.validate()?;
        Ok(())
    }
}
