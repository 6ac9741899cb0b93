use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;

use atriumd::api::{self, AppState};
use atriumd::auth::FixedWindowLimiter;
use atriumd::config::Config;
use atriumd::measurements::LogSink;
use atriumd::store::MemoryStore;

/// Smart-home coordinator: telemetry ingestion, rule evaluation, and
/// gateway command dispatch.
#[derive(Debug, Parser)]
#[command(name = "atriumd", version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    info!("atriumd starting");
    if let Some(path) = &args.config {
        info!("Loaded config from: {}", path.display());
    }

    let shared_secret = config.auth.resolved_shared_secret();
    if shared_secret.is_none() {
        warn!("no gateway shared secret configured; signed routes will answer 503");
    }

    let store = Arc::new(MemoryStore::new());
    let limiter = Arc::new(FixedWindowLimiter::new());
    let sink = Arc::new(LogSink);
    let state = Arc::new(AppState::new(store, limiter, sink, shared_secret));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    api::serve(config.server.listen.clone(), config.server.port, state, shutdown_rx).await?;

    info!("atriumd shutdown complete");
    Ok(())
}
