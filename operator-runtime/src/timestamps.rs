//! Conversions for timestamps found in message payloads.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unrecognized timestamp '{0}'")]
pub struct TimestampError(pub String);

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses a payload timestamp into UTC.
///
/// Accepts epoch milliseconds (13 digits), epoch nanoseconds (19 digits), RFC 3339 with any
/// offset, and naive date-times which are taken to be UTC already.
pub fn todatetime(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let invalid = || TimestampError(raw.to_string());
    let raw = raw.trim();

    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        let value: i64 = raw.parse().map_err(|_| invalid())?;
        return match raw.len() {
            13 => Utc.timestamp_millis_opt(value).single().ok_or_else(invalid),
            19 => Ok(Utc.timestamp_nanos(value)),
            _ => Err(invalid()),
        };
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(invalid)
}

/// Naive ISO-8601 rendering with a trailing `Z`, the format of every timestamp the pipeline emits.
pub fn timestamp_to_str(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
