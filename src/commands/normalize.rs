//! Command Normalizer
//!
//! Turns the raw tokens of a request into a canonical `(name, args, ttl)`
//! triple:
//!
//! - the name is upper-cased
//! - the minimum arity of the command is checked
//! - SET's optional third argument is parsed as a duration and moved into
//!   `ttl`, leaving `args` as `[key, value]`
//! - unknown names are rejected
//!
//! This is a pure function with no access to the store.

use crate::duration::{parse_duration, DurationError};
use std::time::Duration;
use thiserror::Error;

/// Minimum argument counts, not counting the command name.
const MIN_ARITY: &[(&str, usize)] = &[
    ("PING", 0),
    ("SET", 2),
    ("GET", 1),
    ("DEL", 1),
    ("LPUSH", 2),
    ("RPUSH", 2),
    ("LRANGE", 3),
    ("SADD", 2),
    ("SMEMBERS", 1),
    ("HGET", 2),
    ("HSET", 3),
    ("HGETALL", 1),
    ("FLUSHALL", 0),
    ("SUBSCRIBE", 1),
    ("UNSUBSCRIBE", 1),
    ("PUBLISH", 2),
    ("COMMAND", 0),
];

/// Names of every command the server understands.
pub fn command_names() -> impl Iterator<Item = &'static str> {
    MIN_ARITY.iter().map(|(name, _)| *name)
}

/// A request after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Upper-cased command name
    pub name: String,
    pub args: Vec<String>,
    /// Only ever set for SET
    pub ttl: Option<Duration>,
}

/// Reasons a request cannot be normalized.
///
/// The `Display` form is the error line sent to the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("ERR empty command")]
    Empty,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR invalid expire time: {0}")]
    InvalidTtl(#[from] DurationError),
}

/// Normalizes the raw tokens of one request.
///
/// # Example
///
/// ```
/// use kvd::commands::normalize;
/// use std::time::Duration;
///
/// let n = normalize(vec!["set".into(), "k".into(), "v".into(), "10s".into()]).unwrap();
/// assert_eq!(n.name, "SET");
/// assert_eq!(n.args, vec!["k", "v"]);
/// assert_eq!(n.ttl, Some(Duration::from_secs(10)));
/// ```
pub fn normalize(tokens: Vec<String>) -> Result<Normalized, NormalizeError> {
    let mut tokens = tokens.into_iter();
    let name = tokens.next().ok_or(NormalizeError::Empty)?.to_uppercase();
    let mut args: Vec<String> = tokens.collect();

    let min = MIN_ARITY
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, min)| *min)
        .ok_or_else(|| NormalizeError::UnknownCommand(name.clone()))?;

    if args.len() < min {
        return Err(NormalizeError::WrongArity(name.to_lowercase()));
    }

    let mut ttl = None;
    if name == "SET" && args.len() == 3 {
        if let Some(raw) = args.pop() {
            ttl = Some(parse_duration(&raw)?);
        }
    }

    Ok(Normalized { name, args, ttl })
}
