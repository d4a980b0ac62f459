//! Timestamp helpers
//!
//! All timestamps are Unix nanoseconds (`i64`), UTC.

use chrono::Utc;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
pub const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;
pub const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
pub const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;

/// Current wall-clock time in Unix nanoseconds.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Floor a timestamp to the boundary used for a candle step.
///
/// Steps up to a minute align to the minute, up to an hour to the hour,
/// anything longer to the start of the UTC day.
pub fn round_start(timestamp_nanos: i64, step_seconds: i64) -> i64 {
    let unit = if step_seconds <= 60 {
        NANOS_PER_MINUTE
    } else if step_seconds <= 3600 {
        NANOS_PER_HOUR
    } else {
        NANOS_PER_DAY
    };
    timestamp_nanos.div_euclid(unit) * unit
}
