//! Timestamp grammars used by the line formats. All results are UTC.

use chrono::{DateTime, NaiveDateTime, Utc};

use super::model::ParseError;

/// ISO-8601 style: `2024-03-01T10:00:00.123Z`, `2024-03-01T10:00:00.123+02:00`,
/// or the same without an offset (read as UTC). A space may replace the `T`.
pub fn parse_iso(value: &str) -> Result<DateTime<Utc>, ParseError> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            return Ok(ts.with_timezone(&Utc));
        }
    }
    Err(ParseError::Timestamp(value.to_string()))
}

/// Log4j header time: `2024-03-01 10:00:00.123 -0800`.
pub fn parse_log4j(value: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S%.f %z")
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| ParseError::Timestamp(value.to_string()))
}

/// Common log format time: `10/Oct/2000:13:55:36 -0700`.
pub fn parse_clf(value: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_str(value.trim(), "%d/%b/%Y:%H:%M:%S %z")
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| ParseError::Timestamp(value.to_string()))
}

/// Cheap check for a `YYYY-MM-DD` prefix.
pub fn starts_with_date(text: &str) -> bool {
    let b = text.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}
