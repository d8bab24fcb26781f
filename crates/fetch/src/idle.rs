//! Idle detection for background work (Linux `/proc`).
//!
//! Unreadable sources count as idle so background work still happens on
//! systems without `/proc`.

use pkgmesh_core::config::ReplicationConfig;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::fs;

/// Decides whether the machine is quiet enough for background downloads.
#[derive(Debug)]
pub struct IdleMonitor {
    max_load: f64,
    max_net_kbps: f64,
    loadavg_path: PathBuf,
    net_dev_path: PathBuf,
    last_sample: Mutex<Option<(Instant, u64)>>,
}

impl IdleMonitor {
    pub fn new(config: &ReplicationConfig) -> Self {
        Self::with_paths(config, "/proc/loadavg", "/proc/net/dev")
    }

    pub fn with_paths(
        config: &ReplicationConfig,
        loadavg_path: impl Into<PathBuf>,
        net_dev_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            max_load: config.max_load,
            max_net_kbps: config.max_net_kbps,
            loadavg_path: loadavg_path.into(),
            net_dev_path: net_dev_path.into(),
            last_sample: Mutex::new(None),
        }
    }

    /// Low CPU load and low network traffic.
    pub async fn is_idle(&self) -> bool {
        if !self.cpu_idle().await {
            tracing::debug!(max_load = self.max_load, "CPU not idle");
            return false;
        }
        if !self.network_idle().await {
            tracing::debug!(max_net_kbps = self.max_net_kbps, "Network not idle");
            return false;
        }
        true
    }

    async fn cpu_idle(&self) -> bool {
        match fs::read_to_string(&self.loadavg_path).await {
            Ok(text) => match parse_loadavg(&text) {
                Some(load) => load < self.max_load,
                None => {
                    tracing::warn!(path = %self.loadavg_path.display(), "Unparsable load average");
                    true
                }
            },
            Err(e) => {
                tracing::warn!(path = %self.loadavg_path.display(), error = %e, "Could not read load average");
                true
            }
        }
    }

    async fn network_idle(&self) -> bool {
        let bytes = match fs::read_to_string(&self.net_dev_path).await {
            Ok(text) => parse_net_dev(&text),
            Err(e) => {
                tracing::warn!(path = %self.net_dev_path.display(), error = %e, "Could not read network counters");
                return true;
            }
        };
        self.record_sample(Instant::now(), bytes)
    }

    /// Feed one counter sample; true while traffic since the previous sample
    /// stays under the limit. The first sample counts as idle.
    fn record_sample(&self, now: Instant, bytes: u64) -> bool {
        let Ok(mut last) = self.last_sample.lock() else {
            return true;
        };
        let Some((then, previous)) = *last else {
            *last = Some((now, bytes));
            return true;
        };
        let elapsed = now.saturating_duration_since(then);
        if elapsed < Duration::from_secs(1) {
            return true;
        }
        *last = Some((now, bytes));
        let kbps = bytes.saturating_sub(previous) as f64 / elapsed.as_secs_f64() / 1024.0;
        kbps < self.max_net_kbps
    }
}

/// 1-minute load average from `/proc/loadavg`.
pub fn parse_loadavg(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Received plus transmitted bytes over every interface except `lo`.
pub fn parse_net_dev(text: &str) -> u64 {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(iface, _)| iface.trim() != "lo")
        .filter_map(|(_, stats)| {
            let fields: Vec<&str> = stats.split_whitespace().collect();
            if fields.len() < 9 {
                return None;
            }
            let rx: u64 = fields[0].parse().ok()?;
            let tx: u64 = fields[8].parse().ok()?;
            Some(rx + tx)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 9000000     100    0    0    0     0          0         0  9000000     100    0    0    0     0       0          0
  eth0: 1000        10    0    0    0     0          0         0     500      5    0    0    0     0       0          0
 wlan0: 200          2    0    0    0     0          0         0     300      3    0    0    0     0       0          0
";

    #[test]
    fn test_parse_proc_files() {
        assert_eq!(parse_loadavg("0.42 0.30 0.25 1/234 12345\n"), Some(0.42));
        assert_eq!(parse_loadavg(""), None);
        assert_eq!(parse_net_dev(NET_DEV), 2000);
    }

    #[test]
    fn test_network_rate() {
        let monitor = IdleMonitor::new(&ReplicationConfig::default());
        let start = Instant::now();
        assert!(monitor.record_sample(start, 0));
        // 50 KB over 1s is under the 100 KB/s default.
        assert!(monitor.record_sample(start + Duration::from_secs(1), 50 * 1024));
        // 400 KB over the next 2s is 200 KB/s.
        assert!(!monitor.record_sample(start + Duration::from_secs(3), 450 * 1024));
    }

    #[tokio::test]
    async fn test_busy_cpu_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let loadavg = dir.path().join("loadavg");
        std::fs::write(&loadavg, "3.50 2.00 1.00 5/300 999\n").unwrap();
        let config = ReplicationConfig::default();

        let busy = IdleMonitor::with_paths(&config, &loadavg, dir.path().join("missing"));
        assert!(!busy.is_idle().await);

        let unknown = IdleMonitor::with_paths(
            &config,
            dir.path().join("missing-loadavg"),
            dir.path().join("missing-net"),
        );
        assert!(unknown.is_idle().await);
    }
}
