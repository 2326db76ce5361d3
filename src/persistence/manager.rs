//! Periodic snapshot task.
//!
//! On every tick the manager consumes the store's dirty flag and, if it was
//! set, writes a snapshot on the blocking thread pool. A failed save is
//! logged and not retried until the store is mutated again.

use crate::persistence::snapshot;
use crate::storage::StorageEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the persistence task.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Snapshot file
    pub path: PathBuf,
    /// Interval between dirty checks (default: 1 minute)
    pub interval: Duration,
}

impl PersistenceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: Duration::from_secs(60),
        }
    }
}

/// A handle to the running persistence task.
///
/// Dropping the handle signals the task to stop. The final save at shutdown
/// is left to the owner of the store.
#[derive(Debug)]
pub struct PersistenceManager {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PersistenceManager {
    /// Starts the persistence task.
    pub fn start(engine: Arc<StorageEngine>, config: PersistenceConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            path = %config.path.display(),
            interval = ?config.interval,
            "Snapshot persistence started"
        );
        let task = tokio::spawn(persistence_loop(engine, config, shutdown_rx));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signals the task and waits for it, including a save in progress.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Snapshot persistence stopped");
    }
}

impl Drop for PersistenceManager {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn persistence_loop(
    engine: Arc<StorageEngine>,
    config: PersistenceConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Persistence task received shutdown signal");
                    return;
                }
            }
        }

        if !engine.take_dirty() {
            continue;
        }

        let engine = Arc::clone(&engine);
        let path = config.path.clone();
        let result = tokio::task::spawn_blocking(move || snapshot::save(&engine, &path)).await;

        match result {
            Ok(Ok(keys)) => {
                info!(keys = keys, path = %config.path.display(), "Snapshot saved");
            }
            Ok(Err(e)) => {
                warn!(error = %e, path = %config.path.display(), "Snapshot save failed");
            }
            Err(e) => {
                warn!(error = %e, "Snapshot save task panicked");
            }
        }
    }
}
