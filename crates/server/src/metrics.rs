//! Prometheus metrics for the pkgmesh daemon.
//!
//! Fetch, replication and eviction counters live in `pkgmesh_fetch::metrics`
//! and are registered here next to the daemon's own gauges.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static LIVE_PEERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("pkgmesh_live_peers", "Peers announced within the TTL")
        .expect("metric creation failed")
});

pub static IN_FLIGHT_FETCHES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "pkgmesh_fetches_in_flight",
        "Artifacts currently being fetched",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(LIVE_PEERS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(IN_FLIGHT_FETCHES.clone()))
            .expect("metric registration failed");
        pkgmesh_fetch::metrics::register(&REGISTRY).expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    LIVE_PEERS.set(state.peers.live_count().await as i64);
    IN_FLIGHT_FETCHES.set(state.coordinator.in_flight() as i64);

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
        LIVE_PEERS.set(3);
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&REGISTRY.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("pkgmesh_live_peers 3"));
    }
}
