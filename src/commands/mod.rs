//! Command Processing
//!
//! ```text
//! raw tokens
//!     │  normalize()            (normalize.rs)
//!     ▼
//! Normalized { name, args, ttl }
//!     │  Command::from_normalized   (command.rs)
//!     ▼
//! Command
//!     │  execute()              (handler.rs)
//!     ▼
//! RespValue
//! ```
//!
//! SUBSCRIBE, UNSUBSCRIBE and PUBLISH are normalized here but executed by the
//! connection, which owns the delivery loops they need.
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `SET key value [ttl]` (ttl such as `10s`, `5m`, `1h30m`)
//! - `GET key`, `DEL key`
//! - `LPUSH key value [value ...]`, `RPUSH key value [value ...]`
//! - `LRANGE key start stop`
//! - `SADD key member [member ...]`, `SMEMBERS key`
//! - `HSET key field value`, `HGET key field`, `HGETALL key`
//! - `FLUSHALL`
//! - `SUBSCRIBE channel`, `UNSUBSCRIBE channel`, `PUBLISH channel message`
//! - `COMMAND`

pub mod command;
pub mod handler;
pub mod normalize;

pub use command::{Command, CommandError};
pub use handler::{execute, CommandHandler};
pub use normalize::{normalize, NormalizeError, Normalized};
