//! Storage Engine Module
//!
//! This module provides the typed key space of kvd and the background
//! sweeper that reclaims expired keys.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                StorageEngine                │
//! │   RwLock<HashMap<String, Entry>> + dirty    │
//! └─────────────────────────────────────────────┘
//!          ▲                         ▲
//!          │                         │
//!  ┌───────┴────────┐       ┌────────┴─────────┐
//!  │ ExpirySweeper  │       │ PersistenceMgr   │
//!  │ (Tokio task)   │       │ (Tokio task)     │
//!  └────────────────┘       └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use kvd::storage::{Kind, StorageEngine};
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set("session", "token123".to_string(), Some(Duration::from_secs(3600)));
//! engine.sadd("tags", vec!["rust".into(), "rust".into()]);
//!
//! assert_eq!(engine.key_kind("tags"), Some(Kind::Set));
//! assert_eq!(engine.smembers("tags"), vec!["rust"]);
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, Kind, StorageEngine, Value};
pub use expiry::{ExpiryConfig, ExpirySweeper};
