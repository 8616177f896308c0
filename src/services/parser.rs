//! Feed parsers.
//!
//! - `parse_user_feed`: a single user's `timestamp<TAB>message` file
//! - `parse_registry_feed`: a peer registry's `nick<TAB>url<TAB>timestamp<TAB>message` dump
//!
//! Structural problems (wrong field count, empty input) abort parsing.
//! Unparseable timestamps only drop their line; they are collected and
//! returned next to the successfully parsed data.

use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::status::{self, StatusMap};
use crate::models::User;

/// A dropped line and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftError {
    /// 1-based line number in the fetched body
    pub line: usize,
    pub message: String,
}

/// Parse output plus any recoverable per-line failures.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub value: T,
    pub soft_errors: Vec<SoftError>,
}

impl<T> Parsed<T> {
    fn new(value: T, soft_errors: Vec<SoftError>) -> Self {
        Self { value, soft_errors }
    }

    pub fn is_clean(&self) -> bool {
        self.soft_errors.is_empty()
    }

    /// Aggregate of all soft errors, if there were any.
    pub fn soft_error(&self) -> Option<AppError> {
        if self.soft_errors.is_empty() {
            return None;
        }
        let summary = self
            .soft_errors
            .iter()
            .map(|e| format!("line {}: {}", e.line, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Some(AppError::SoftParse {
            count: self.soft_errors.len(),
            summary,
        })
    }

    /// Log the aggregate soft error against `source`, if any.
    pub fn warn_soft_errors(&self, source: &str) {
        if let Some(err) = self.soft_error() {
            log::warn!("Partial parse of {}: {}", source, err);
        }
    }
}

/// Meaningful lines of a feed body with their 1-based line numbers.
fn content_lines(data: &[u8]) -> Result<Vec<(usize, String)>> {
    if data.is_empty() {
        return Err(AppError::EmptyFeed);
    }
    let text = String::from_utf8_lossy(data);
    Ok(text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(i, line)| (i, line.to_string()))
        .collect())
}

/// Parse a user's feed into stored status records.
pub fn parse_user_feed(data: &[u8], nick: &str, url: &str) -> Result<Parsed<StatusMap>> {
    let mut statuses = StatusMap::new();
    let mut soft_errors = Vec::new();

    for (line_no, line) in content_lines(data)? {
        let columns: Vec<&str> = line.split('\t').collect();
        let [raw_time, message] = columns[..] else {
            return Err(AppError::malformed(
                line_no,
                format!("expected 2 tab-separated fields, found {}", columns.len()),
            ));
        };

        match status::parse_timestamp(raw_time) {
            Ok(time) => {
                statuses.insert(time, status::make_record(nick, url, raw_time, message));
            }
            Err(e) => soft_errors.push(SoftError {
                line: line_no,
                message: format!("unable to parse timestamp {raw_time:?}: {e}"),
            }),
        }
    }

    Ok(Parsed::new(statuses, soft_errors))
}

/// Parse a peer registry's dump into one user per feed URL.
///
/// Repeated lines for the same URL are merged into that user's statuses.
/// New users get a join date of now.
pub fn parse_registry_feed(data: &[u8]) -> Result<Parsed<Vec<User>>> {
    let mut users: Vec<User> = Vec::new();
    let mut by_url: HashMap<String, usize> = HashMap::new();
    let mut soft_errors = Vec::new();

    for (line_no, line) in content_lines(data)? {
        let columns: Vec<&str> = line.split('\t').collect();
        let [nick, url, raw_time, _message] = columns[..] else {
            return Err(AppError::malformed(
                line_no,
                format!("expected 4 tab-separated fields, found {}", columns.len()),
            ));
        };

        let time = match status::parse_rfc3339(raw_time) {
            Ok(time) => time,
            Err(e) => {
                soft_errors.push(SoftError {
                    line: line_no,
                    message: format!("unable to parse timestamp {raw_time:?}: {e}"),
                });
                continue;
            }
        };

        let idx = *by_url.entry(url.to_string()).or_insert_with(|| {
            users.push(User::new(nick, url));
            users.len() - 1
        });
        users[idx].status.insert(time, line.clone());
    }

    Ok(Parsed::new(users, soft_errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const URL: &str = "https://a.example/twtxt.txt";

    #[test]
    fn test_user_feed_skips_comments_and_blanks() {
        let feed = b"# nick = alice\n\n2024-01-01T00:00:00Z\thello #test\n   \n2024-01-02T00:00:00Z\tsecond\n";
        let parsed = parse_user_feed(feed, "alice", URL).unwrap();

        assert!(parsed.is_clean());
        assert_eq!(parsed.value.len(), 2);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            parsed.value[&t],
            "alice\thttps://a.example/twtxt.txt\t2024-01-01T00:00:00Z\thello #test"
        );
    }

    #[test]
    fn test_user_feed_timestamp_variants() {
        let feed = b"2024-01-01T00:00:00.5Z\tfractional\n2024-01-02T00:00:00+01:00\tfull\n2024-01-03T10:30Z\tminutes\n";
        let parsed = parse_user_feed(feed, "alice", URL).unwrap();
        assert!(parsed.is_clean());
        assert_eq!(parsed.value.len(), 3);
    }

    #[test]
    fn test_user_feed_bad_timestamp_is_soft() {
        let feed = b"not-a-date\tlost\n2024-01-01T00:00:00Z\tkept\n";
        let parsed = parse_user_feed(feed, "alice", URL).unwrap();

        assert_eq!(parsed.value.len(), 1);
        assert_eq!(parsed.soft_errors.len(), 1);
        assert_eq!(parsed.soft_errors[0].line, 1);
        assert!(matches!(
            parsed.soft_error(),
            Some(AppError::SoftParse { count: 1, .. })
        ));
    }

    #[test]
    fn test_user_feed_wrong_field_count_is_hard() {
        let feed = b"2024-01-01T00:00:00Z\tok\n2024-01-02T00:00:00Z no tab here\n";
        let err = parse_user_feed(feed, "alice", URL).unwrap_err();
        assert!(matches!(err, AppError::MalformedFeed { line: 2, .. }));
    }

    #[test]
    fn test_user_feed_empty() {
        assert!(matches!(
            parse_user_feed(b"", "alice", URL),
            Err(AppError::EmptyFeed)
        ));
        let comments_only = parse_user_feed(b"# just a comment\n", "alice", URL).unwrap();
        assert!(comments_only.value.is_empty());
    }

    #[test]
    fn test_registry_feed_groups_by_user() {
        let dump = "\
alice\thttps://a.example/twtxt.txt\t2024-01-01T00:00:00Z\tfirst
bob\thttps://b.example/twtxt.txt\t2024-01-01T01:00:00Z\tbob here
alice\thttps://a.example/twtxt.txt\t2024-01-02T00:00:00Z\tsecond
";
        let parsed = parse_registry_feed(dump.as_bytes()).unwrap();
        assert!(parsed.is_clean());
        assert_eq!(parsed.value.len(), 2);

        let alice = parsed.value.iter().find(|u| u.nick == "alice").unwrap();
        assert_eq!(alice.url, "https://a.example/twtxt.txt");
        assert_eq!(alice.status.len(), 2);
        assert!(alice.status.values().all(|r| r.split('\t').count() == 4));
    }

    #[test]
    fn test_registry_feed_bad_timestamp_is_soft() {
        let dump = "\
alice\thttps://a.example/twtxt.txt\tlast tuesday\tlost
bob\thttps://b.example/twtxt.txt\t2024-01-01T01:00:00Z\tkept
";
        let parsed = parse_registry_feed(dump.as_bytes()).unwrap();
        assert_eq!(parsed.value.len(), 1);
        assert_eq!(parsed.value[0].nick, "bob");
        assert_eq!(parsed.soft_errors.len(), 1);
    }

    #[test]
    fn test_registry_feed_wrong_field_count_is_hard() {
        let dump = "alice\thttps://a.example/twtxt.txt\t2024-01-01T00:00:00Z\n";
        assert!(matches!(
            parse_registry_feed(dump.as_bytes()),
            Err(AppError::MalformedFeed { line: 1, .. })
        ));
    }
}
