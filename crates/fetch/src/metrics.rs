//! Prometheus metrics for fetching, replication and eviction.
//!
//! The statics are created lazily; [`register`] adds them to a registry and is
//! called once by the daemon.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub static FETCH_ATTEMPTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pkgmesh_fetch_attempts_total",
            "Fetch attempts by source tier and outcome",
        ),
        &["tier", "outcome"],
    )
    .expect("metric creation failed")
});

pub static BYTES_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pkgmesh_bytes_committed_total",
        "Total bytes committed to the cache",
    )
    .expect("metric creation failed")
});

pub static COALESCED_WAITERS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pkgmesh_fetch_coalesced_total",
        "Requests that joined an in-flight fetch of the same artifact",
    )
    .expect("metric creation failed")
});

pub static PEERS_BLACKLISTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pkgmesh_peers_blacklisted_total",
        "Peers blacklisted after serving bad bytes",
    )
    .expect("metric creation failed")
});

pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pkgmesh_cache_hits_total",
        "Fetch requests answered from the local cache",
    )
    .expect("metric creation failed")
});

pub static EVICTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pkgmesh_evictions_total",
        "Artifacts removed to bring a media under quota",
    )
    .expect("metric creation failed")
});

/// Add every fetch metric to `registry`.
pub fn register(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(FETCH_ATTEMPTS.clone()))?;
    registry.register(Box::new(BYTES_COMMITTED.clone()))?;
    registry.register(Box::new(COALESCED_WAITERS.clone()))?;
    registry.register(Box::new(PEERS_BLACKLISTED.clone()))?;
    registry.register(Box::new(CACHE_HITS.clone()))?;
    registry.register(Box::new(EVICTIONS.clone()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_into_fresh_registry() {
        let registry = Registry::new();
        register(&registry).unwrap();
        FETCH_ATTEMPTS.with_label_values(&["peer", "committed"]).inc();
        assert_eq!(registry.gather().len(), 6);
        assert!(register(&registry).is_err());
    }
}
