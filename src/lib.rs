//! # kvd - An In-Memory Multi-Type Key-Value Server
//!
//! kvd keeps strings, lists, sets and hashes in memory and serves them over
//! a RESP-style array/bulk-string protocol. Keys can expire, clients can
//! publish and subscribe to channels, and the whole store is snapshotted to
//! a JSON file so a restart picks up where the last save left off.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                 kvd                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (server.rs) │    │  Session    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌─────────────────────────────┐  │
//! │                     │   Broker    │    │        StorageEngine        │  │
//! │                     │  (pub/sub)  │    │ RwLock<HashMap> + dirty bit │  │
//! │                     └─────────────┘    └─────────────────────────────┘  │
//! │                                           ▲                 ▲           │
//! │                               ┌───────────┴───┐   ┌─────────┴────────┐  │
//! │                               │ ExpirySweeper │   │PersistenceManager│  │
//! │                               └───────────────┘   └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvd::pubsub::Broker;
//! use kvd::server::{serve, ServerState};
//! use kvd::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let _sweeper = ExpirySweeper::start(Arc::clone(&storage), ExpiryConfig::default());
//!
//!     let state = ServerState::new(storage, Arc::new(Broker::default()));
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     serve(listener, state).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: request decoding and reply encoding
//! - [`storage`]: the typed key space and the expiry sweeper
//! - [`commands`]: normalization, validation and execution of commands
//! - [`pubsub`]: topic registry with bounded per-subscriber mailboxes
//! - [`persistence`]: JSON snapshots and the periodic save task
//! - [`connection`]: per-client session and outbound sink
//! - [`server`]: the accept loop
//! - [`config`]: command-line and environment options
//!
//! ## Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: every access treats an expired key as absent
//! 2. **Active**: a background task periodically removes expired keys
//!
//! Both kinds of removal mark the store dirty, so the next snapshot no
//! longer contains the key.

pub mod commands;
pub mod config;
pub mod connection;
pub mod duration;
pub mod persistence;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod storage;

pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::{PersistenceConfig, PersistenceError, PersistenceManager};
pub use protocol::{ParseError, RespParser, RespValue};
pub use pubsub::Broker;
pub use server::{serve, ServerState};
pub use storage::{ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port kvd listens on
pub const DEFAULT_PORT: u16 = 6379;

/// The default host kvd binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of kvd
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
