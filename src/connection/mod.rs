//! Connection Handling
//!
//! Every accepted client runs as its own Tokio task.
//!
//! ```text
//!              accept()  (server.rs)
//!                 │
//!                 ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                    ConnectionHandler                       │
//! │                                                            │
//! │  read bytes ──> RespParser ──> normalize ──┬─> dispatch    │
//! │                                            │               │
//! │                        SUBSCRIBE/PUBLISH ──┘               │
//! │                               │                            │
//! │                               ▼                            │
//! │                     delivery task per channel              │
//! │                               │                            │
//! │            replies and pushes │                            │
//! │                               ▼                            │
//! │                         ReplyWriter                        │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! - `handler`: the session state machine and [`ConnectionStats`]
//! - `writer`: the mutex-guarded outbound sink shared with delivery tasks

pub mod handler;
pub mod writer;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
pub use writer::ReplyWriter;
