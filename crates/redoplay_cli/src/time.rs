//! Parsing of time range flags.

use chrono::{DateTime, NaiveDateTime};
use redoplay_core::Timestamp;
use thiserror::Error;

const PLAIN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A time flag that is neither RFC 3339, `YYYY-MM-DD HH:MM:SS`, nor a
/// millisecond count.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid time '{input}': expected RFC 3339, 'YYYY-MM-DD HH:MM:SS' (UTC), or milliseconds since the epoch")]
pub struct ParseTimeError {
    input: String,
}

/// Parses a time flag into milliseconds since the Unix epoch.
pub fn parse_time(input: &str) -> Result<Timestamp, ParseTimeError> {
    let trimmed = input.trim();
    if let Ok(millis) = trimmed.parse::<i64>() {
        return Ok(millis);
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(time.timestamp_millis());
    }
    if let Ok(time) = NaiveDateTime::parse_from_str(trimmed, PLAIN_FORMAT) {
        return Ok(time.and_utc().timestamp_millis());
    }
    Err(ParseTimeError {
        input: input.to_string(),
    })
}

/// Formats milliseconds since the epoch for text output.
pub fn format_time(millis: Timestamp) -> String {
    match DateTime::from_timestamp_millis(millis) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => millis.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_forms() {
        assert_eq!(parse_time("1700000000000").unwrap(), 1_700_000_000_000);
        assert_eq!(parse_time("1970-01-01 00:00:01").unwrap(), 1_000);
        assert_eq!(parse_time("1970-01-01T00:00:01.500Z").unwrap(), 1_500);
        assert_eq!(parse_time("1970-01-01T01:00:00+01:00").unwrap(), 0);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_time("yesterday").unwrap_err();
        assert!(err.to_string().contains("'yesterday'"));
    }

    #[test]
    fn formats_epoch() {
        assert_eq!(format_time(1_500), "1970-01-01 00:00:01.500 UTC");
    }
}
