//! pyre server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use pyre_core::StorageLayout;
use pyre_core::config::AppConfig;
use pyre_metadata::ArtifactStore;
use pyre_server::{AppState, create_router};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pyre - burn-after-read encrypted blob server
#[derive(Parser, Debug)]
#[command(name = "pyred")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "PYRE_CONFIG", default_value = "config/server.toml")]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `PYRE_*`
/// environment variables (`PYRE_SECTION__FIELD`).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PYRE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
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

    tracing::info!("pyre v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    pyre_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let layout = StorageLayout::new(&config.storage);
    pyre_storage::ensure_directories(&layout)
        .await
        .context("failed to create storage directories")?;

    let store = pyre_metadata::from_config(&config.storage)
        .await
        .context("failed to initialize metadata store")?;
    store
        .health_check()
        .await
        .context("metadata store health check failed")?;
    tracing::info!(data_dir = %config.storage.data_dir.display(), "Metadata store initialized");

    let state = AppState::new(config.clone(), store);
    tracing::info!(
        workers = config.burn.workers,
        queue_depth = config.burn.queue_depth,
        "Burn workers spawned"
    );

    if config.cleanup.enabled {
        let _cleanup_handle = state.cleanup_scheduler().spawn();
    } else {
        tracing::info!("Cleanup scheduler disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
