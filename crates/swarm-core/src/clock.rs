//! Wall-clock helpers.
//!
//! Expiry columns are stored as integer epoch milliseconds so SQL comparisons
//! are numeric; human-facing timestamps are RFC 3339 with millisecond
//! precision and a `Z` suffix, which also sorts lexicographically.

use chrono::{SecondsFormat, TimeZone, Utc};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as RFC 3339 (`2025-01-01T00:00:00.000Z`).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render epoch milliseconds as RFC 3339. Out-of-range input renders as the epoch.
pub fn millis_to_rfc3339(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `start + ttl_seconds`, saturating.
pub fn expiry_after(start_millis: i64, ttl_seconds: u64) -> i64 {
    let ttl_ms = i64::try_from(ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
    start_millis.saturating_add(ttl_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_has_millis_and_z() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'), "got {ts}");
        assert_eq!(ts.len(), "2025-01-01T00:00:00.000Z".len());
    }

    #[test]
    fn millis_roundtrip_render() {
        assert_eq!(millis_to_rfc3339(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(millis_to_rfc3339(1_500), "1970-01-01T00:00:01.500Z");
    }

    #[test]
    fn expiry_adds_seconds() {
        assert_eq!(expiry_after(1_000, 2), 3_000);
        assert_eq!(expiry_after(i64::MAX - 1, 10), i64::MAX);
        assert_eq!(expiry_after(0, u64::MAX), i64::MAX);
    }
}
