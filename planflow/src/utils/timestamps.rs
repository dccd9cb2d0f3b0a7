//! Timestamps and callback deadlines.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// UTC timestamp used for records, events and deadlines.
pub type Timestamp = DateTime<Utc>;

#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Current time in the event wire format.
///
/// ```
/// use planflow::utils::iso_timestamp;
///
/// assert!(iso_timestamp().ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&now_utc())
}

/// Formats as `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
#[must_use]
pub fn format_iso8601(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// `from + timeout`, or `None` when the sum does not fit a timestamp.
#[must_use]
pub fn deadline_after(from: Timestamp, timeout: Duration) -> Option<Timestamp> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
}

/// The earlier of two optional deadlines; a missing one never wins.
#[must_use]
pub fn earliest(a: Option<Timestamp>, b: Option<Timestamp>) -> Option<Timestamp> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_format_iso8601() {
        assert_eq!(format_iso8601(&at(12, 30)), "2024-03-01T12:30:00.000000+00:00");
    }

    #[test]
    fn test_deadline_after() {
        assert_eq!(
            deadline_after(at(12, 0), Duration::from_secs(90 * 60)),
            Some(at(13, 30))
        );
        assert_eq!(deadline_after(at(12, 0), Duration::MAX), None);
    }

    #[test]
    fn test_earliest() {
        assert_eq!(earliest(Some(at(12, 0)), Some(at(11, 0))), Some(at(11, 0)));
        assert_eq!(earliest(None, Some(at(11, 0))), Some(at(11, 0)));
        assert_eq!(earliest(None, None), None);
    }
}
