//! Typed commands.
//!
//! A [`Command`] is built from a normalized request and carries exactly the
//! arguments its handler needs, already validated and parsed.

use crate::commands::normalize::Normalized;
use std::time::Duration;
use thiserror::Error;

/// A validated store command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping { message: Option<String> },
    Set { key: String, value: String, ttl: Option<Duration> },
    Get { key: String },
    Del { key: String },
    LPush { key: String, values: Vec<String> },
    RPush { key: String, values: Vec<String> },
    LRange { key: String, start: i64, stop: i64 },
    SAdd { key: String, members: Vec<String> },
    SMembers { key: String },
    HGet { key: String, field: String },
    HSet { key: String, field: String, value: String },
    HGetAll { key: String },
    FlushAll,
    /// Lists the supported commands
    Command,
}

/// Validation failures, replied to the client as error frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
}

impl Command {
    /// Builds a command from a normalized request.
    pub fn from_normalized(request: Normalized) -> Result<Command, CommandError> {
        let Normalized { name, args, ttl } = request;
        let arity = |ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(CommandError::WrongArity(name.to_lowercase()))
            }
        };

        let n = args.len();
        let mut args = args.into_iter();
        // Arity is checked before any call
        let mut next = move || args.next().unwrap_or_default();

        let command = match name.as_str() {
            "PING" => {
                arity(n <= 1)?;
                Command::Ping {
                    message: (n == 1).then(&mut next),
                }
            }
            "SET" => {
                arity(n == 2)?;
                Command::Set {
                    key: next(),
                    value: next(),
                    ttl,
                }
            }
            "GET" => {
                arity(n == 1)?;
                Command::Get { key: next() }
            }
            "DEL" => {
                arity(n == 1)?;
                Command::Del { key: next() }
            }
            "LPUSH" | "RPUSH" => {
                arity(n >= 2)?;
                let key = next();
                let values = (1..n).map(|_| next()).collect();
                if name == "LPUSH" {
                    Command::LPush { key, values }
                } else {
                    Command::RPush { key, values }
                }
            }
            "LRANGE" => {
                arity(n == 3)?;
                let key = next();
                let start = parse_index(&next())?;
                let stop = parse_index(&next())?;
                Command::LRange { key, start, stop }
            }
            "SADD" => {
                arity(n >= 2)?;
                let key = next();
                let members = (1..n).map(|_| next()).collect();
                Command::SAdd { key, members }
            }
            "SMEMBERS" => {
                arity(n == 1)?;
                Command::SMembers { key: next() }
            }
            "HGET" => {
                arity(n == 2)?;
                Command::HGet {
                    key: next(),
                    field: next(),
                }
            }
            "HSET" => {
                arity(n == 3)?;
                Command::HSet {
                    key: next(),
                    field: next(),
                    value: next(),
                }
            }
            "HGETALL" => {
                arity(n == 1)?;
                Command::HGetAll { key: next() }
            }
            "FLUSHALL" => {
                arity(n == 0)?;
                Command::FlushAll
            }
            "COMMAND" => Command::Command,
            _ => return Err(CommandError::UnknownCommand(name)),
        };

        Ok(command)
    }

    /// Upper-case name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping { .. } => "PING",
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Del { .. } => "DEL",
            Command::LPush { .. } => "LPUSH",
            Command::RPush { .. } => "RPUSH",
            Command::LRange { .. } => "LRANGE",
            Command::SAdd { .. } => "SADD",
            Command::SMembers { .. } => "SMEMBERS",
            Command::HGet { .. } => "HGET",
            Command::HSet { .. } => "HSET",
            Command::HGetAll { .. } => "HGETALL",
            Command::FlushAll => "FLUSHALL",
            Command::Command => "COMMAND",
        }
    }
}

fn parse_index(raw: &str) -> Result<i64, CommandError> {
    raw.parse().map_err(|_| CommandError::NotAnInteger)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, args: &[&str]) -> Normalized {
        Normalized {
            name: name.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ttl: None,
        }
    }

    #[test]
    fn test_build_commands() {
        assert_eq!(
            Command::from_normalized(request("PING", &[])),
            Ok(Command::Ping { message: None })
        );
        assert_eq!(
            Command::from_normalized(request("PING", &["hi"])),
            Ok(Command::Ping {
                message: Some("hi".to_string())
            })
        );
        assert_eq!(
            Command::from_normalized(request("RPUSH", &["k", "a", "b"])),
            Ok(Command::RPush {
                key: "k".to_string(),
                values: vec!["a".to_string(), "b".to_string()],
            })
        );
        assert_eq!(
            Command::from_normalized(request("HSET", &["h", "f", "v"])),
            Ok(Command::HSet {
                key: "h".to_string(),
                field: "f".to_string(),
                value: "v".to_string(),
            })
        );
    }

    #[test]
    fn test_set_keeps_ttl() {
        let mut req = request("SET", &["k", "v"]);
        req.ttl = Some(Duration::from_secs(10));

        assert_eq!(
            Command::from_normalized(req),
            Ok(Command::Set {
                key: "k".to_string(),
                value: "v".to_string(),
                ttl: Some(Duration::from_secs(10)),
            })
        );
    }

    #[test]
    fn test_lrange_indices() {
        assert_eq!(
            Command::from_normalized(request("LRANGE", &["l", "-2", "-1"])),
            Ok(Command::LRange {
                key: "l".to_string(),
                start: -2,
                stop: -1,
            })
        );
        assert_eq!(
            Command::from_normalized(request("LRANGE", &["l", "zero", "1"])),
            Err(CommandError::NotAnInteger)
        );
    }

    #[test]
    fn test_exact_arity() {
        assert_eq!(
            Command::from_normalized(request("GET", &["a", "b"])),
            Err(CommandError::WrongArity("get".to_string()))
        );
        assert!(Command::from_normalized(request("SET", &["k"])).is_err());
        assert!(Command::from_normalized(request("FLUSHALL", &["now"])).is_err());
        assert!(Command::from_normalized(request("COMMAND", &["DOCS", "GET"])).is_ok());
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            Command::from_normalized(request("SUBSCRIBE", &["news"])),
            Err(CommandError::UnknownCommand("SUBSCRIBE".to_string()))
        );
    }
}
