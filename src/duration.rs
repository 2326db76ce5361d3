//! Duration Strings
//!
//! Parses human-written durations such as `10s`, `5m`, `1h30m` or `250ms`.
//! The same format is accepted by the third argument of `SET` and by the
//! interval options of the server configuration.
//!
//! A duration is one or more `<number><unit>` pairs. Numbers may carry a
//! fractional part (`1.5s`). Supported units:
//!
//! | unit | meaning      |
//! |------|--------------|
//! | `ns` | nanoseconds  |
//! | `us` | microseconds |
//! | `ms` | milliseconds |
//! | `s`  | seconds      |
//! | `m`  | minutes      |
//! | `h`  | hours        |

use std::time::Duration;
use thiserror::Error;

/// Errors produced by [`parse_duration`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
}

/// Parses a duration string like `10s` or `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }

    // A bare zero is the one unit-less value that is unambiguous.
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let bytes = s.as_bytes();
    let mut pos = 0;
    let mut total_nanos: f64 = 0.0;

    while pos < bytes.len() {
        let number_start = pos;
        while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
            pos += 1;
        }
        if pos == number_start {
            return Err(DurationError::Invalid(input.to_string()));
        }
        let number: f64 = s[number_start..pos]
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_string()))?;

        let unit_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        if pos == unit_start {
            return Err(DurationError::MissingUnit(input.to_string()));
        }

        let unit = &s[unit_start..pos];
        let scale = match unit {
            "ns" => 1.0,
            "us" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => {
                return Err(DurationError::UnknownUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                })
            }
        };

        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(DurationError::Invalid(input.to_string()));
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
