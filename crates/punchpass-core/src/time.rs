//! Millisecond clock and timestamp conversions.
//!
//! Storage keeps instants as integer Unix milliseconds; the HTTP surface
//! speaks RFC 3339. These helpers are the only place the two meet.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Returns the current time as Unix milliseconds.
pub fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix milliseconds to a UTC instant.
///
/// Out-of-range values clamp to the Unix epoch.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Format Unix milliseconds as RFC 3339 with millisecond precision.
pub fn to_rfc3339(ms: i64) -> String {
    from_millis(ms).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a client supplied "since" marker.
///
/// Accepts RFC 3339 timestamps and bare integer Unix milliseconds (the
/// format older wallet clients echo back). Returns `None` for anything else.
pub fn parse_since(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}
