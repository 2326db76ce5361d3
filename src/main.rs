//! kvd - An In-Memory Multi-Type Key-Value Server
//!
//! Entry point: loads the snapshot, starts the background tasks and serves
//! clients until Ctrl+C, then saves whatever changed since the last save.

use anyhow::Context;
use clap::Parser;
use kvd::persistence::{self, PersistenceConfig, PersistenceManager};
use kvd::pubsub::Broker;
use kvd::server::{serve, ServerState};
use kvd::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
use kvd::Config;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    println!(
        r#"
kvd v{} - In-Memory Multi-Type Key-Value Server
──────────────────────────────────────────────────
Listening on {}
Snapshot file {}

Use Ctrl+C to shutdown gracefully.
"#,
        kvd::VERSION,
        config.bind_addr(),
        config.snapshot.display()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Create the storage engine (shared across all connections)
    let storage = Arc::new(StorageEngine::new());
    let loaded = persistence::load(&storage, &config.snapshot)
        .with_context(|| format!("failed to load snapshot {}", config.snapshot.display()))?;
    info!(keys = loaded, path = %config.snapshot.display(), "Snapshot loaded");

    let sweeper = ExpirySweeper::start(
        Arc::clone(&storage),
        ExpiryConfig {
            interval: config.sweep_interval,
        },
    );
    let persister = PersistenceManager::start(
        Arc::clone(&storage),
        PersistenceConfig {
            path: config.snapshot.clone(),
            interval: config.save_interval,
        },
    );

    let broker = Arc::new(Broker::new(config.mailbox_capacity));
    let state = ServerState::new(Arc::clone(&storage), broker);
    let stats = Arc::clone(&state.stats);

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
    print_banner(&config);
    info!(addr = %config.bind_addr(), "Listening");

    tokio::select! {
        _ = serve(listener, state) => {}
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received, stopping server...");
        }
    }

    sweeper.shutdown().await;
    persister.shutdown().await;

    if storage.take_dirty() {
        let path = config.snapshot.clone();
        let engine = Arc::clone(&storage);
        match tokio::task::spawn_blocking(move || persistence::save(&engine, &path)).await {
            Ok(Ok(keys)) => info!(keys = keys, "Final snapshot saved"),
            Ok(Err(e)) => warn!(error = %e, "Final snapshot failed"),
            Err(e) => warn!(error = %e, "Final snapshot task panicked"),
        }
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        bytes_read = stats.bytes_read.load(Ordering::Relaxed),
        bytes_written = stats.bytes_written.load(Ordering::Relaxed),
        expired_keys = storage.expired_count(),
        "Server shutdown complete"
    );
    Ok(())
}
