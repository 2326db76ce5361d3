//! Snapshot Persistence
//!
//! - `snapshot`: the JSON file format plus `save` and `load`
//! - `manager`: the background task that saves when the store is dirty
//!
//! The store is loaded once at startup. After that, the manager writes a
//! fresh snapshot on every tick that finds the dirty flag set.

pub mod manager;
pub mod snapshot;

use std::path::PathBuf;
use thiserror::Error;

pub use manager::{PersistenceConfig, PersistenceManager};
pub use snapshot::{load, save};

/// Errors from saving or loading a snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed snapshot record for key {key:?}: {reason}")]
    Malformed { key: String, reason: String },
}
