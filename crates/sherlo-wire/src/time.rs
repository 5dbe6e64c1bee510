use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};

/// Milliseconds since the Unix epoch, clamped into `i64`.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}

/// Human-readable UTC rendering of an epoch-millisecond timestamp, used
/// for the `time` field of log records.
pub fn iso_time(timestamp_ms: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp_ms).single() {
        Some(datetime) => datetime.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => timestamp_ms.to_string(),
    }
}
