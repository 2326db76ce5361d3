//! Incremental Request Decoder
//!
//! Requests are always an array of bulk strings:
//!
//! ```text
//! *3\r\n $3\r\nSET\r\n $3\r\nkey\r\n $5\r\nvalue\r\n
//! └─┬─┘  └────┬─────┘  └────┬─────┘  └─────┬──────┘
//!  count   element 1     element 2      element 3
//! ```
//!
//! The decoder works on whatever bytes have arrived so far and returns:
//! - `Ok(Some((tokens, consumed)))` - one full command, `consumed` bytes used
//! - `Ok(None)` - the command is incomplete, read more and retry
//! - `Err(ParseError)` - the stream is malformed and cannot be resynchronized
//!
//! There is no inline-command form. Anything other than `*` at the start of a
//! command, or other than `$` at the start of an element, is a framing error.
//! Payload bytes are not validated: invalid UTF-8 is replaced with U+FFFD, so
//! a binary value never desynchronizes the stream.

use crate::protocol::types::{prefix, CRLF};
use thiserror::Error;

/// Framing errors. Every variant is fatal to the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected '*', got {0:?}")]
    MissingArrayPrefix(char),

    #[error("expected '$', got {0:?}")]
    MissingBulkPrefix(char),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Missing CRLF, overlong header line, etc.
    #[error("{0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in one command
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// A `*<n>` or `$<n>` header never needs more bytes than this
const MAX_HEADER_LEN: usize = 32;

/// A decoded command: the raw tokens, name first.
pub type Tokens = Vec<String>;

/// Stateless request decoder with a configurable bulk size limit.
///
/// # Example
///
/// ```
/// use kvd::protocol::RespParser;
///
/// let parser = RespParser::new();
/// let (tokens, consumed) = parser
///     .parse(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
///
/// assert_eq!(tokens, vec!["GET", "name"]);
/// assert_eq!(consumed, 23);
/// ```
#[derive(Debug, Clone)]
pub struct RespParser {
    max_bulk_size: usize,
}

impl Default for RespParser {
    fn default() -> Self {
        Self {
            max_bulk_size: MAX_BULK_SIZE,
        }
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser that rejects bulk strings larger than `max`.
    pub fn with_max_bulk_size(max: usize) -> Self {
        Self { max_bulk_size: max }
    }

    pub fn max_bulk_size(&self) -> usize {
        self.max_bulk_size
    }

    /// Attempts to decode one command from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Tokens, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        if first != prefix::ARRAY {
            return Err(ParseError::MissingArrayPrefix(first as char));
        }

        let Some((count, mut consumed)) = read_header(buf)? else {
            return Ok(None);
        };
        if count < 0 || count as usize > MAX_ARRAY_LEN {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut tokens = Vec::with_capacity(count.min(64));

        for _ in 0..count {
            match self.parse_bulk(&buf[consumed..])? {
                Some((token, used)) => {
                    tokens.push(token);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((tokens, consumed)))
    }

    /// Decodes one `$<len>\r\n<data>\r\n` element.
    fn parse_bulk(&self, buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        if first != prefix::BULK_STRING {
            return Err(ParseError::MissingBulkPrefix(first as char));
        }

        let Some((length, data_start)) = read_header(buf)? else {
            return Ok(None);
        };
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > self.max_bulk_size {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: self.max_bulk_size,
            });
        }

        let total_needed = data_start + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }

        if &buf[data_start + length..total_needed] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = String::from_utf8_lossy(&buf[data_start..data_start + length]).into_owned();

        Ok(Some((data, total_needed)))
    }
}

/// Reads the integer of a `<prefix><n>\r\n` header line.
///
/// Returns the number and the bytes consumed including the CRLF.
fn read_header(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let body = &buf[1..];
    let end = match find_crlf(body) {
        Some(pos) => pos,
        None if body.len() > MAX_HEADER_LEN => {
            return Err(ParseError::ProtocolError("header line too long".to_string()))
        }
        None => return Ok(None),
    };

    let text = String::from_utf8_lossy(&body[..end]);
    let n: i64 = text
        .parse()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))?;

    Ok(Some((n, 1 + end + 2)))
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes one command with the default limits.
pub fn parse_command(buf: &[u8]) -> ParseResult<Option<(Tokens, usize)>> {
    RespParser::new().parse(buf)
}
