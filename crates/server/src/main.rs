//! pkgmesh daemon binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use pkgmesh_core::config::AppConfig;
use pkgmesh_fetch::Scheduler;
use pkgmesh_peers::Discovery;
use pkgmesh_server::{AppState, CatalogCapabilities, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pkgmesh - LAN-aware package cache daemon
#[derive(Parser, Debug)]
#[command(name = "pkgmeshd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PKGMESH_CONFIG",
        default_value = "/etc/pkgmesh/pkgmeshd.toml"
    )]
    config: String,

    /// Development mode: separate ports, ./dev-state, short intervals
    #[arg(long, env = "PKGMESH_DEV")]
    dev: bool,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let defaults = if args.dev {
        AppConfig::development()
    } else {
        AppConfig::default()
    };
    let mut figment = Figment::from(Serialized::defaults(defaults));

    let config_path = std::path::Path::new(&args.config);
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::debug!("No config file found at {}, using defaults", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PKGMESH_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pkgmesh v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    if config.dev_mode {
        tracing::info!("Development mode");
    }

    pkgmesh_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let state = AppState::from_config(config.clone()).await?;
    let cancel = state.cancellation();

    if config.peers.enabled {
        let discovery = Discovery::new(
            Arc::clone(&state.peers),
            Arc::new(CatalogCapabilities::new(state.catalog.clone())),
            config.peers.clone(),
            config.server.port,
        );
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = discovery.run(cancel).await {
                tracing::error!(error = %e, "Peer discovery failed");
            }
        });
    } else {
        tracing::info!("Peer discovery disabled");
    }

    if config.replication.enabled {
        let scheduler = Scheduler::new(Arc::clone(&state.replication), &config.cache);
        tokio::spawn(scheduler.run(cancel.clone()));
    } else {
        tracing::info!("Background scheduler disabled");
    }

    let shutdown = shutdown_signal(state.clone());
    let app = create_router(state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    tracing::info!("pkgmesh stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, or when the daemon is cancelled. Queued
/// fetches and background tasks are stopped before the HTTP drain starts.
async fn shutdown_signal(state: AppState) {
    let cancel = state.cancellation();
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }
    tracing::info!("Shutdown requested");
    state.shutdown();
}
