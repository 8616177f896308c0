//! Status records and timestamp handling.
//!
//! A stored status is a single line with four TAB-separated fields:
//!
//! ```text
//! nick<TAB>url<TAB>raw-timestamp<TAB>message
//! ```
//!
//! Query code indexes into this layout positionally, so every value placed
//! in a [`StatusMap`] must keep exactly this shape.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

/// Timestamp-keyed collection of a user's status records.
pub type StatusMap = BTreeMap<DateTime<Utc>, String>;

/// Number of TAB-separated fields in a stored status record.
pub const RECORD_FIELDS: usize = 4;

/// Build a stored status record from its parts.
pub fn make_record(nick: &str, url: &str, raw_timestamp: &str, message: &str) -> String {
    format!("{nick}\t{url}\t{raw_timestamp}\t{message}")
}

/// Message field of a status record, if the record is well formed.
pub fn record_message(record: &str) -> Option<&str> {
    record.splitn(RECORD_FIELDS, '\t').nth(RECORD_FIELDS - 1)
}

/// Parse a feed timestamp.
///
/// Accepts RFC3339 with or without fractional seconds, and the
/// minute-precision variant (`2024-01-01T10:30Z`, `2024-01-01T10:30+02:00`)
/// that many hand-written feeds use.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let raw = raw.trim();
    if !raw.contains('.') && is_minute_precision(raw) {
        if let Some(with_seconds) = insert_seconds(raw) {
            return DateTime::parse_from_rfc3339(&with_seconds).map(|t| t.with_timezone(&Utc));
        }
    }
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}

/// Parse a strict RFC3339 timestamp (registry dumps and persisted keys).
pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw.trim()).map(|t| t.with_timezone(&Utc))
}

/// Render a timestamp losslessly (sub-second digits only when present).
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Zulu timestamps carry one colon without seconds, offset ones carry two.
fn is_minute_precision(raw: &str) -> bool {
    let colons = raw.matches(':').count();
    if raw.ends_with('Z') || raw.ends_with('z') {
        colons == 1
    } else {
        colons == 2
    }
}

fn insert_seconds(raw: &str) -> Option<String> {
    let time_start = raw.find(['T', 't', ' '])?;
    let zone_start = if raw.ends_with('Z') || raw.ends_with('z') {
        raw.len() - 1
    } else {
        time_start + raw[time_start..].rfind(['+', '-'])?
    };
    Some(format!("{}:00{}", &raw[..zone_start], &raw[zone_start..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_full_rfc3339() {
        let t = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_fractional() {
        let t = parse_timestamp("2024-01-01T00:00:00.250+01:00").unwrap();
        assert_eq!(t.timestamp_subsec_millis(), 250);
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap() + chrono::Duration::milliseconds(250));
    }

    #[test]
    fn test_parse_minute_precision() {
        let zulu = parse_timestamp("2019-05-21T14:08Z").unwrap();
        assert_eq!(zulu, Utc.with_ymd_and_hms(2019, 5, 21, 14, 8, 0).unwrap());

        let offset = parse_timestamp("2019-05-21T14:08-07:00").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2019, 5, 21, 21, 8, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2019-05-21").is_err());
    }

    #[test]
    fn test_format_is_lossless() {
        let t = parse_timestamp("2024-03-04T05:06:07.123456789Z").unwrap();
        assert_eq!(parse_rfc3339(&format_timestamp(&t)).unwrap(), t);

        let whole = parse_timestamp("2024-03-04T05:06:07Z").unwrap();
        assert_eq!(format_timestamp(&whole), "2024-03-04T05:06:07Z");
    }

    #[test]
    fn test_record_message() {
        let record = make_record("alice", "https://a.example/twtxt.txt", "2024-01-01T00:00:00Z", "hello #test");
        assert_eq!(record_message(&record), Some("hello #test"));
        assert_eq!(record_message("only\tthree\tfields"), None);
    }
}
