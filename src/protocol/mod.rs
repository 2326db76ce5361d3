//! Wire Protocol
//!
//! Requests arrive as arrays of bulk strings and are decoded into token
//! vectors by [`RespParser`]. Replies are built as [`RespValue`]s and encoded
//! with [`RespValue::serialize`].
//!
//! ## Modules
//!
//! - `types`: reply frames and their encoding
//! - `parser`: incremental request decoder
//!
//! ## Example
//!
//! ```
//! use kvd::protocol::{parse_command, RespValue};
//!
//! let (tokens, _) = parse_command(b"*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
//! assert_eq!(tokens, vec!["PING"]);
//!
//! assert_eq!(RespValue::pong().serialize(), b"+PONG\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_command, ParseError, ParseResult, RespParser, Tokens, MAX_BULK_SIZE};
pub use types::RespValue;
