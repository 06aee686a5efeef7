//! Date arithmetic for server-issued deadlines.
//!
//! The ERP reports datetimes either as RFC 3339 or as naive
//! `"YYYY-MM-DD HH:mm:ss"` strings without a zone marker. All arithmetic here
//! works on normalized `DateTime<Utc>` values; [`qualify_timestamps`] is the
//! boundary adapter that attaches the configured offset to naive strings
//! before payloads reach serde.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Parses a server datetime string. Naive stamps get `naive_offset_minutes`
/// attached (0 = assume UTC, the ERP's convention).
pub fn parse_server_datetime(raw: &str, naive_offset_minutes: i32) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive: NaiveDateTime = raw.replace(' ', "T").parse().ok()?;
    naive_to_utc(naive, naive_offset_minutes)
}

fn naive_to_utc(naive: NaiveDateTime, offset_minutes: i32) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(offset_minutes * 60)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whole minutes until `deadline`, rounded down. Negative means expired by
/// that many minutes: a deadline 30 s in the past is `-1`.
pub fn remaining_minutes(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (deadline - now).num_seconds().div_euclid(60)
}

/// Whole minutes since `start`, rounded down.
pub fn elapsed_minutes(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_seconds().div_euclid(60)
}

/// Renders a minute count as `"1d 3h"`, `"2h 30m"` or `"45m"`, keeping only
/// nonzero units but always showing minutes when everything else is zero.
/// Negative durations render as `"expired"`, never as a negative number.
pub fn format_duration(minutes: i64) -> String {
    if minutes < 0 {
        return "expired".to_string();
    }
    let days = minutes / (24 * 60);
    let hours = (minutes % (24 * 60)) / 60;
    let mins = minutes % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if mins > 0 || parts.is_empty() {
        parts.push(format!("{mins}m"));
    }
    parts.join(" ")
}

/// Whether two instants fall on the same calendar day in the display zone.
pub fn is_same_day(a: DateTime<Utc>, b: DateTime<Utc>, display_offset_minutes: i32) -> bool {
    let Some(offset) = FixedOffset::east_opt(display_offset_minutes * 60) else {
        return false;
    };
    a.with_timezone(&offset).date_naive() == b.with_timezone(&offset).date_naive()
}

pub fn is_today(value: DateTime<Utc>, now: DateTime<Utc>, display_offset_minutes: i32) -> bool {
    is_same_day(value, now, display_offset_minutes)
}

/// Rewrites naive datetime strings inside a JSON payload to RFC 3339 with the
/// configured offset, so downstream serde sees unambiguous instants. Only
/// values under date-ish keys are touched.
pub fn qualify_timestamps(value: &mut Value, naive_offset_minutes: i32) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if let Value::String(raw) = entry {
                    if is_dateish_key(key) {
                        if let Some(qualified) = qualify_naive(raw, naive_offset_minutes) {
                            *entry = Value::String(qualified);
                        }
                    }
                } else {
                    qualify_timestamps(entry, naive_offset_minutes);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                qualify_timestamps(item, naive_offset_minutes);
            }
        }
        _ => {}
    }
}

fn is_dateish_key(key: &str) -> bool {
    key.contains("date")
        || key.contains("time")
        || key.ends_with("_at")
        || key == "start"
        || key == "end"
        || key == "timestamp"
}

fn qualify_naive(raw: &str, naive_offset_minutes: i32) -> Option<String> {
    if DateTime::parse_from_rfc3339(raw).is_ok() {
        return None;
    }
    let naive: NaiveDateTime = raw.replace(' ', "T").parse().ok()?;
    naive_to_utc(naive, naive_offset_minutes).map(|dt| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn naive_stamps_are_utc_by_default() {
        let parsed = parse_server_datetime("2025-08-27 14:30:00", 0).unwrap();
        assert_eq!(parsed, at("2025-08-27T14:30:00Z"));
    }

    #[test]
    fn naive_offset_is_honoured_when_configured() {
        let parsed = parse_server_datetime("2025-08-27 08:30:00", -360).unwrap();
        assert_eq!(parsed, at("2025-08-27T14:30:00Z"));
    }

    #[test]
    fn rfc3339_passes_through() {
        let parsed = parse_server_datetime("2025-08-27T14:30:00+02:00", 0).unwrap();
        assert_eq!(parsed, at("2025-08-27T12:30:00Z"));
    }

    #[test]
    fn unparseable_input_is_none() {
        assert!(parse_server_datetime("mañana", 0).is_none());
        assert!(parse_server_datetime("", 0).is_none());
    }

    #[test]
    fn remaining_rounds_down() {
        let now = Utc.with_ymd_and_hms(2025, 8, 27, 12, 0, 0).unwrap();
        assert_eq!(remaining_minutes(now + Duration::seconds(90), now), 1);
        assert_eq!(remaining_minutes(now - Duration::seconds(30), now), -1);
        assert_eq!(remaining_minutes(now, now), 0);
        assert_eq!(remaining_minutes(now - Duration::seconds(61), now), -2);
    }

    #[test]
    fn elapsed_rounds_down() {
        let now = Utc.with_ymd_and_hms(2025, 8, 27, 12, 0, 0).unwrap();
        assert_eq!(elapsed_minutes(now - Duration::seconds(119), now), 1);
        assert_eq!(elapsed_minutes(now, now), 0);
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(0), "0m");
        assert_eq!(format_duration(45), "45m");
        assert_eq!(format_duration(150), "2h 30m");
        assert_eq!(format_duration(24 * 60 + 180), "1d 3h");
        assert_eq!(format_duration(24 * 60), "1d");
        assert_eq!(format_duration(-5), "expired");
    }

    #[test]
    fn same_day_respects_display_offset() {
        // 03:00 UTC is still the previous day at UTC-6.
        let late = at("2025-08-27T03:00:00Z");
        let prior_evening = at("2025-08-26T23:00:00Z");
        assert!(!is_same_day(late, prior_evening, 0));
        assert!(is_same_day(late, prior_evening, -360));
    }

    #[test]
    fn qualify_rewrites_naive_dateish_values() {
        let mut payload = json!({
            "create_date": "2025-08-27 14:30:00",
            "wait_limit_time": "2025-08-27T15:30:00",
            "comments": "2025-08-27 14:30:00",
            "nested": {"started_at": "2025-08-27 10:00:00"},
            "already": {"timestamp": "2025-08-27T14:30:00+00:00"},
        });
        qualify_timestamps(&mut payload, 0);
        assert_eq!(payload["create_date"], "2025-08-27T14:30:00+00:00");
        assert_eq!(payload["wait_limit_time"], "2025-08-27T15:30:00+00:00");
        // Non-date keys are left untouched even when they look like stamps.
        assert_eq!(payload["comments"], "2025-08-27 14:30:00");
        assert_eq!(payload["nested"]["started_at"], "2025-08-27T10:00:00+00:00");
        assert_eq!(payload["already"]["timestamp"], "2025-08-27T14:30:00+00:00");
    }
}
