//! Command Dispatcher
//!
//! Executes typed [`Command`]s against the storage engine and shapes the
//! reply frame for each one.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │  Normalized  │──>│ Command::from_   │──>│   execute()   │──> RespValue
//! │ (name, args) │   │   normalized()   │   │               │
//! └──────────────┘   └──────────────────┘   └───────┬───────┘
//!                                                   │
//!                                                   ▼
//!                                            StorageEngine
//! ```
//!
//! ## Reply shapes
//!
//! | command            | reply                                         |
//! |--------------------|-----------------------------------------------|
//! | PING               | `+PONG`, or the argument as a bulk string     |
//! | SET, SADD, HSET    | `+OK`                                         |
//! | FLUSHALL           | `+OK`                                         |
//! | GET, HGET          | bulk string, or `*0` if there is no value     |
//! | DEL                | `+1` if the key existed, `-0` if it did not   |
//! | LPUSH, RPUSH       | status line with the new length, e.g. `+3`    |
//! | LRANGE, SMEMBERS   | multi-bulk, `*0` if empty                     |
//! | HGETALL            | multi-bulk of field/value pairs, `*0` if empty|
//! | COMMAND            | multi-bulk of supported command names         |
//!
//! A key of the wrong kind produces the same reply as an absent key.

use crate::commands::command::Command;
use crate::commands::normalize::{command_names, Normalized};
use crate::protocol::RespValue;
use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Dispatches normalized requests to the storage engine.
///
/// Cheap to clone; each connection holds its own copy.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Validates and executes one normalized request.
    ///
    /// Validation failures become error replies; this never fails.
    pub fn dispatch(&self, request: Normalized) -> RespValue {
        match Command::from_normalized(request) {
            Ok(command) => {
                trace!(command = command.name(), "Executing command");
                execute(&self.storage, command)
            }
            Err(e) => RespValue::error(e.to_string()),
        }
    }
}

/// Executes a command against `storage`.
pub fn execute(storage: &StorageEngine, command: Command) -> RespValue {
    match command {
        Command::Ping { message } => ping(message),
        Command::Set { key, value, ttl } => set(storage, &key, value, ttl),
        Command::Get { key } => get(storage, &key),
        Command::Del { key } => del(storage, &key),
        Command::LPush { key, values } => push_reply(storage.lpush(&key, values)),
        Command::RPush { key, values } => push_reply(storage.rpush(&key, values)),
        Command::LRange { key, start, stop } => {
            RespValue::bulk_array(storage.lrange(&key, start, stop))
        }
        Command::SAdd { key, members } => {
            storage.sadd(&key, members);
            RespValue::ok()
        }
        Command::SMembers { key } => RespValue::bulk_array(storage.smembers(&key)),
        Command::HGet { key, field } => optional(storage.hget(&key, &field)),
        Command::HSet { key, field, value } => {
            storage.hset(&key, field, value);
            RespValue::ok()
        }
        Command::HGetAll { key } => RespValue::bulk_array(storage.hgetall(&key)),
        Command::FlushAll => {
            storage.flush();
            RespValue::ok()
        }
        Command::Command => {
            RespValue::bulk_array(command_names().map(str::to_string).collect())
        }
    }
}

// ========================================================================
// Handlers
// ========================================================================

fn ping(message: Option<String>) -> RespValue {
    match message {
        Some(message) => RespValue::bulk_string(message),
        None => RespValue::pong(),
    }
}

fn set(storage: &StorageEngine, key: &str, value: String, ttl: Option<Duration>) -> RespValue {
    storage.set(key, value, ttl);
    RespValue::ok()
}

fn get(storage: &StorageEngine, key: &str) -> RespValue {
    optional(storage.get(key))
}

/// Existing keys answer with a status, missing keys with an error-framed zero.
fn del(storage: &StorageEngine, key: &str) -> RespValue {
    if storage.delete(key) {
        RespValue::simple_string("1")
    } else {
        RespValue::error("0")
    }
}

fn push_reply(len: usize) -> RespValue {
    RespValue::simple_string(len.to_string())
}

fn optional(value: Option<String>) -> RespValue {
    value.map(RespValue::bulk_string).unwrap_or(RespValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::normalize;

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(StorageEngine::new()))
    }

    fn run(handler: &CommandHandler, args: &[&str]) -> Vec<u8> {
        let tokens = args.iter().map(|s| s.to_string()).collect();
        match normalize(tokens) {
            Ok(request) => handler.dispatch(request).serialize(),
            Err(e) => RespValue::error(e.to_string()).serialize(),
        }
    }

    #[test]
    fn test_ping() {
        let handler = create_handler();

        assert_eq!(run(&handler, &["PING"]), b"+PONG\r\n");
        assert_eq!(run(&handler, &["ping", "hello"]), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_set_get() {
        let handler = create_handler();

        assert_eq!(run(&handler, &["SET", "name", "Ariz"]), b"+OK\r\n");
        assert_eq!(run(&handler, &["GET", "name"]), b"$4\r\nAriz\r\n");
    }

    #[test]
    fn test_get_nonexistent() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["GET", "nope"]), b"*0\r\n");
    }

    #[test]
    fn test_set_with_ttl() {
        let handler = create_handler();

        assert_eq!(run(&handler, &["SET", "k", "v", "50ms"]), b"+OK\r\n");
        assert_eq!(run(&handler, &["GET", "k"]), b"$1\r\nv\r\n");

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(run(&handler, &["GET", "k"]), b"*0\r\n");
    }

    #[test]
    fn test_del() {
        let handler = create_handler();

        run(&handler, &["SET", "k", "v"]);
        assert_eq!(run(&handler, &["DEL", "k"]), b"+1\r\n");
        assert_eq!(run(&handler, &["DEL", "k"]), b"-0\r\n");
    }

    #[test]
    fn test_list_commands() {
        let handler = create_handler();

        assert_eq!(run(&handler, &["RPUSH", "l", "c"]), b"+1\r\n");
        assert_eq!(run(&handler, &["LPUSH", "l", "a", "b"]), b"+3\r\n");
        assert_eq!(
            run(&handler, &["LRANGE", "l", "0", "-1"]),
            b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
        );
        assert_eq!(run(&handler, &["LRANGE", "l", "5", "9"]), b"*0\r\n");
        assert_eq!(
            run(&handler, &["LRANGE", "l", "x", "1"]),
            b"-ERR value is not an integer or out of range\r\n"
        );
    }

    #[test]
    fn test_set_commands() {
        let handler = create_handler();

        assert_eq!(run(&handler, &["SADD", "s", "x", "x"]), b"+OK\r\n");
        assert_eq!(run(&handler, &["SMEMBERS", "s"]), b"*1\r\n$1\r\nx\r\n");
        assert_eq!(run(&handler, &["SMEMBERS", "none"]), b"*0\r\n");
    }

    #[test]
    fn test_hash_commands() {
        let handler = create_handler();

        assert_eq!(run(&handler, &["HSET", "h", "f", "v"]), b"+OK\r\n");
        assert_eq!(run(&handler, &["HGET", "h", "f"]), b"$1\r\nv\r\n");
        assert_eq!(run(&handler, &["HGET", "h", "g"]), b"*0\r\n");
        assert_eq!(
            run(&handler, &["HGETALL", "h"]),
            b"*2\r\n$1\r\nf\r\n$1\r\nv\r\n"
        );
    }

    #[test]
    fn test_wrong_kind_looks_absent() {
        let handler = create_handler();

        run(&handler, &["SET", "k", "v"]);
        assert_eq!(run(&handler, &["LPUSH", "k", "a"]), b"+0\r\n");
        assert_eq!(run(&handler, &["LRANGE", "k", "0", "-1"]), b"*0\r\n");
        assert_eq!(run(&handler, &["HGET", "k", "f"]), b"*0\r\n");
        assert_eq!(run(&handler, &["SADD", "k", "m"]), b"+OK\r\n");
        assert_eq!(run(&handler, &["GET", "k"]), b"$1\r\nv\r\n");
    }

    #[test]
    fn test_flushall() {
        let handler = create_handler();

        run(&handler, &["SET", "a", "1"]);
        run(&handler, &["RPUSH", "b", "1"]);
        assert_eq!(run(&handler, &["FLUSHALL"]), b"+OK\r\n");
        assert!(handler.storage().is_empty());
    }

    #[test]
    fn test_command_lists_names() {
        let handler = create_handler();

        let reply = String::from_utf8(run(&handler, &["COMMAND"])).unwrap();
        assert!(reply.starts_with("*17\r\n"));
        assert!(reply.contains("$7\r\nHGETALL\r\n"));
    }

    #[test]
    fn test_validation_errors() {
        let handler = create_handler();

        assert_eq!(
            run(&handler, &["GET", "a", "b"]),
            b"-ERR wrong number of arguments for 'get' command\r\n"
        );
        assert_eq!(run(&handler, &["NOPE"]), b"-ERR unknown command 'NOPE'\r\n");
    }

    #[test]
    fn test_set_rejects_trailing_tokens() {
        let handler = create_handler();

        assert_eq!(
            run(&handler, &["SET", "k", "v", "10s", "extra"]),
            b"-ERR wrong number of arguments for 'set' command\r\n"
        );
        assert!(handler.storage().is_empty());
    }
}
