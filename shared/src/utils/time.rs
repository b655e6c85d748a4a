//! Time-related utilities

use chrono::{DateTime, SecondsFormat, Utc};

/// Current wall-clock time in whole seconds since the UNIX epoch.
///
/// Sub-second precision is not needed for queue wait times.
pub fn system_time_secs() -> i64 {
    Utc::now().timestamp()
}

/// Format epoch milliseconds as an RFC 3339 UTC timestamp for log messages.
///
/// Values outside chrono's representable range are rendered as the raw number.
pub fn millis_to_rfc3339(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| epoch_ms.to_string())
}
