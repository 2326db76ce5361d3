//! Reply Values and Wire Encoding
//!
//! Every reply the server sends is a [`RespValue`]. Each kind starts with a
//! one-byte prefix and ends with CRLF:
//!
//! | kind         | wire form                          |
//! |--------------|------------------------------------|
//! | status       | `+OK\r\n`                          |
//! | error        | `-ERR unknown command 'FOO'\r\n`   |
//! | integer      | `:3\r\n`                           |
//! | bulk string  | `$5\r\nhello\r\n`                  |
//! | null / empty | `*0\r\n`                           |
//! | multi-bulk   | `*2\r\n$1\r\na\r\n$1\r\nb\r\n`     |
//!
//! "No result" and "empty sequence" share the `*0\r\n` encoding, so a client
//! cannot tell an absent key from a key of the wrong kind.

use bytes::Bytes;

/// The CRLF terminator used by every frame
pub const CRLF: &[u8] = b"\r\n";

/// Frame type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line. Must not contain CRLF.
    SimpleString(String),

    /// Error line. Must not contain CRLF.
    Error(String),

    Integer(i64),

    /// Length-prefixed, binary-safe payload.
    BulkString(Bytes),

    /// No result. Encoded exactly like an empty array.
    Null,

    /// Multi-part reply. Elements may be any frame.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a new status reply.
    ///
    /// # Example
    /// ```
    /// use kvd::protocol::RespValue;
    /// assert_eq!(RespValue::simple_string("OK").serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new error reply.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Encodes a logical sequence of strings as a multi-bulk reply.
    ///
    /// An empty sequence becomes [`RespValue::Null`].
    pub fn bulk_array(items: Vec<String>) -> Self {
        if items.is_empty() {
            return RespValue::Null;
        }
        RespValue::Array(items.into_iter().map(RespValue::bulk_string).collect())
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value to its wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => line(buf, prefix::ARRAY, b"0"),
            RespValue::Array(values) => {
                line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

#[inline]
fn line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}
