//! Wall-clock helpers.
//!
//! Timestamps crossing the wire or the debug API are Unix milliseconds (UTC).

use chrono::{TimeZone, Utc};

/// Current Unix timestamp in milliseconds (UTC).
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render a Unix millisecond timestamp as RFC 3339 (UTC).
///
/// Returns `None` when the timestamp is outside chrono's representable range.
pub fn millis_to_rfc3339(timestamp_millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(timestamp_millis)
        .single()
        .map(|dt| dt.to_rfc3339())
}
