//! Server configuration.
//!
//! Every option can be given on the command line or through a `KVD_*`
//! environment variable. Intervals use the same duration strings as the
//! `SET` TTL argument (`30s`, `5m`, `1h30m`).

use crate::duration::parse_duration;
use crate::pubsub::DEFAULT_MAILBOX_CAPACITY;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug, Clone)]
#[command(name = "kvd", author, version, about, long_about = None)]
pub struct Config {
    /// Host to bind to
    #[arg(long, env = "KVD_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "KVD_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Snapshot file, loaded at startup and rewritten periodically
    #[arg(long, env = "KVD_SNAPSHOT", default_value = "store.json")]
    pub snapshot: PathBuf,

    /// How often to save the store when it has changed
    #[arg(long, env = "KVD_SAVE_INTERVAL", default_value = "1m", value_parser = parse_duration)]
    pub save_interval: Duration,

    /// How often to remove expired keys
    #[arg(long, env = "KVD_SWEEP_INTERVAL", default_value = "1m", value_parser = parse_duration)]
    pub sweep_interval: Duration,

    /// Messages buffered per subscriber before new ones are dropped
    #[arg(long, env = "KVD_MAILBOX_CAPACITY", default_value_t = DEFAULT_MAILBOX_CAPACITY)]
    pub mailbox_capacity: usize,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "KVD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port must be > 0")]
    ZeroPort,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("mailbox capacity must be > 0")]
    ZeroMailboxCapacity,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.save_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("save interval"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("sweep interval"));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::ZeroMailboxCapacity);
        }
        Ok(())
    }

    /// Returns the bind address as a string
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
