//! Timestamp helpers.
//!
//! Cabio stores all timestamps as unix milliseconds (i64). Devices on the
//! history feed report their own wall clock as `HH:MM:SS DD/MM/YYYY`,
//! which is parsed here and treated as UTC.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Device-reported timestamp format on the history feed.
const DEVICE_TIME_FORMAT: &str = "%H:%M:%S %d/%m/%Y";

/// Current time as unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a device-reported `HH:MM:SS DD/MM/YYYY` timestamp.
///
/// Returns `None` when the string does not match the device format.
pub fn parse_device_time(value: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value.trim(), DEVICE_TIME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// Render unix milliseconds in the device format, for logs and responses.
pub fn format_device_time(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(dt) => dt.format(DEVICE_TIME_FORMAT).to_string(),
        None => millis.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_time() {
        let millis = parse_device_time("14:30:05 02/01/2025").unwrap();
        assert_eq!(format_device_time(millis), "14:30:05 02/01/2025");
    }

    #[test]
    fn test_parse_device_time_rejects_garbage() {
        assert!(parse_device_time("not a time").is_none());
        assert!(parse_device_time("14:30 02/01/2025").is_none());
        assert!(parse_device_time("").is_none());
    }

    #[test]
    fn test_now_millis_is_recent() {
        // Anything after 2020 counts as a sane clock.
        assert!(now_millis() > 1_577_836_800_000);
    }
}
