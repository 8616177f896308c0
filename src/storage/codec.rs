//! Flat key scheme shared by the storage backends.
//!
//! Key-value layout, one entry per user field and per status:
//!
//! ```text
//! <url>*Nick            nickname
//! <url>*URL             feed URL
//! <url>*IP              submitter address, empty when unknown
//! <url>*Date            join date (RFC3339)
//! <url>*LastModified    last Last-Modified header
//! <url>*Status*<time>   status record, keyed by RFC3339 timestamp
//! remote*<index>        peer registry URL
//! ```
//!
//! The relational backend stores the same data as `(urlKey, isUser,
//! dataKey, data)` rows; see [`Row`].
//!
//! URLs may themselves contain `*`, so keys are split from the right.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::status::{format_timestamp, parse_rfc3339};
use crate::models::{RegistrySnapshot, User};
use crate::utils::dedupe;

const SEPARATOR: char = '*';
const STATUS_SEGMENT: &str = "Status";
const REMOTE_PREFIX: &str = "remote*";

/// `dataKey` of a peer registry row.
pub const REMOTE_DATA_KEY: &str = "REMOTE REGISTRY";
const REMOTE_DATA: &[u8] = b"NULL";

/// A key or row that could not be decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unrecognized key {0:?}")]
    UnknownKey(String),

    #[error("bad timestamp in key {key:?}: {source}")]
    BadTimestamp {
        key: String,
        source: chrono::ParseError,
    },

    #[error("bad value for key {key:?}: {reason}")]
    BadValue { key: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserField {
    Nick,
    Url,
    Ip,
    Date,
    LastModified,
}

impl UserField {
    const ALL: [UserField; 5] = [
        UserField::Nick,
        UserField::Url,
        UserField::Ip,
        UserField::Date,
        UserField::LastModified,
    ];

    fn key_name(self) -> &'static str {
        match self {
            UserField::Nick => "Nick",
            UserField::Url => "URL",
            UserField::Ip => "IP",
            UserField::Date => "Date",
            UserField::LastModified => "LastModified",
        }
    }

    fn column_name(self) -> &'static str {
        match self {
            UserField::Nick => "nickname",
            UserField::Url => "url",
            UserField::Ip => "uip",
            UserField::Date => "date",
            UserField::LastModified => "lastmodified",
        }
    }

    fn from_key_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key_name() == name)
    }

    fn from_column_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.column_name() == name)
    }

    fn value(self, user: &User) -> String {
        match self {
            UserField::Nick => user.nick.clone(),
            UserField::Url => user.url.clone(),
            UserField::Ip => user.ip.map(|ip| ip.to_string()).unwrap_or_default(),
            UserField::Date => format_timestamp(&user.join_date),
            UserField::LastModified => user.last_modified.clone(),
        }
    }
}

/// One decoded unit of persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Nick { url: String, nick: String },
    Url { url: String },
    Ip { url: String, ip: Option<IpAddr> },
    JoinDate { url: String, date: DateTime<Utc> },
    LastModified { url: String, value: String },
    Status {
        url: String,
        time: DateTime<Utc>,
        record: String,
    },
    /// Relational rows carry no index; they keep insertion order
    Remote { index: Option<usize>, url: String },
}

impl Record {
    /// Owning user's URL; `None` for peer entries.
    pub fn user_url(&self) -> Option<&str> {
        match self {
            Record::Nick { url, .. }
            | Record::Url { url }
            | Record::Ip { url, .. }
            | Record::JoinDate { url, .. }
            | Record::LastModified { url, .. }
            | Record::Status { url, .. } => Some(url),
            Record::Remote { .. } => None,
        }
    }

    fn field(url: &str, field: UserField, value: &str, key: &str) -> Result<Self, CodecError> {
        let url = url.to_string();
        let bad_value = |reason: String| CodecError::BadValue {
            key: key.to_string(),
            reason,
        };

        Ok(match field {
            UserField::Nick => Record::Nick {
                url,
                nick: value.to_string(),
            },
            UserField::Url => Record::Url { url },
            UserField::Ip => {
                let ip = match value {
                    "" | "<nil>" => None,
                    raw => Some(raw.parse().map_err(|e| bad_value(format!("{e}")))?),
                };
                Record::Ip { url, ip }
            }
            UserField::Date => Record::JoinDate {
                url,
                date: parse_rfc3339(value).map_err(|e| bad_value(format!("{e}")))?,
            },
            UserField::LastModified => Record::LastModified {
                url,
                value: value.to_string(),
            },
        })
    }
}

fn field_key(url: &str, field: UserField) -> String {
    format!("{url}{SEPARATOR}{}", field.key_name())
}

fn status_key(url: &str, time: &DateTime<Utc>) -> String {
    format!(
        "{url}{SEPARATOR}{STATUS_SEGMENT}{SEPARATOR}{}",
        format_timestamp(time)
    )
}

fn remote_key(index: usize) -> String {
    format!("{REMOTE_PREFIX}{index}")
}

/// Key/value entries for one user.
pub fn encode_user(user: &User) -> Vec<(String, String)> {
    let fields = UserField::ALL
        .into_iter()
        .map(|field| (field_key(&user.url, field), field.value(user)));
    let statuses = user
        .status
        .iter()
        .map(|(time, record)| (status_key(&user.url, time), record.clone()));
    fields.chain(statuses).collect()
}

/// Key/value entries for a whole snapshot.
pub fn encode_snapshot(snapshot: &RegistrySnapshot) -> Vec<(String, String)> {
    let users = snapshot.users.iter().flat_map(encode_user);
    let remotes = snapshot
        .remotes
        .iter()
        .enumerate()
        .map(|(index, url)| (remote_key(index), url.clone()));
    users.chain(remotes).collect()
}

/// Decode a key/value entry.
pub fn decode_entry(key: &str, value: &str) -> Result<Record, CodecError> {
    if let Some(index) = key.strip_prefix(REMOTE_PREFIX) {
        let index = index
            .parse()
            .map_err(|_| CodecError::UnknownKey(key.to_string()))?;
        return Ok(Record::Remote {
            index: Some(index),
            url: value.to_string(),
        });
    }

    let (prefix, last) = key
        .rsplit_once(SEPARATOR)
        .ok_or_else(|| CodecError::UnknownKey(key.to_string()))?;

    if let Some(field) = UserField::from_key_name(last) {
        if prefix.is_empty() {
            return Err(CodecError::UnknownKey(key.to_string()));
        }
        return Record::field(prefix, field, value, key);
    }

    let url = prefix
        .strip_suffix(STATUS_SEGMENT)
        .and_then(|p| p.strip_suffix(SEPARATOR))
        .filter(|url| !url.is_empty())
        .ok_or_else(|| CodecError::UnknownKey(key.to_string()))?;
    let time = parse_rfc3339(last).map_err(|source| CodecError::BadTimestamp {
        key: key.to_string(),
        source,
    })?;

    Ok(Record::Status {
        url: url.to_string(),
        time,
        record: value.to_string(),
    })
}

/// One row of the relational backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub url_key: String,
    pub is_user: bool,
    pub data_key: String,
    pub data: Vec<u8>,
}

impl Row {
    fn user(url: &str, data_key: String, data: String) -> Self {
        Self {
            url_key: url.to_string(),
            is_user: true,
            data_key,
            data: data.into_bytes(),
        }
    }
}

/// Relational rows for one user.
pub fn user_rows(user: &User) -> Vec<Row> {
    let fields = UserField::ALL
        .into_iter()
        .map(|field| Row::user(&user.url, field.column_name().to_string(), field.value(user)));
    let statuses = user
        .status
        .iter()
        .map(|(time, record)| Row::user(&user.url, format_timestamp(time), record.clone()));
    fields.chain(statuses).collect()
}

/// Relational rows for a whole snapshot.
pub fn snapshot_rows(snapshot: &RegistrySnapshot) -> Vec<Row> {
    let users = snapshot.users.iter().flat_map(user_rows);
    let remotes = snapshot.remotes.iter().map(|url| Row {
        url_key: url.clone(),
        is_user: false,
        data_key: REMOTE_DATA_KEY.to_string(),
        data: REMOTE_DATA.to_vec(),
    });
    users.chain(remotes).collect()
}

/// Decode a relational row.
pub fn decode_row(row: &Row) -> Result<Record, CodecError> {
    if !row.is_user {
        return Ok(Record::Remote {
            index: None,
            url: row.url_key.clone(),
        });
    }

    let key = format!("{}{SEPARATOR}{}", row.url_key, row.data_key);
    if row.url_key.is_empty() {
        return Err(CodecError::UnknownKey(key));
    }
    let value = std::str::from_utf8(&row.data).map_err(|e| CodecError::BadValue {
        key: key.clone(),
        reason: e.to_string(),
    })?;

    if let Some(field) = UserField::from_column_name(&row.data_key) {
        return Record::field(&row.url_key, field, value, &key);
    }

    let time = parse_rfc3339(&row.data_key)
        .map_err(|source| CodecError::BadTimestamp { key, source })?;
    Ok(Record::Status {
        url: row.url_key.clone(),
        time,
        record: value.to_string(),
    })
}

/// Reassembles a snapshot from decoded records in any order.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    users: BTreeMap<String, User>,
    remotes: Vec<(Option<usize>, String)>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, record: Record) {
        match record {
            Record::Nick { url, nick } => self.user(url).nick = nick,
            Record::Url { url } => {
                self.user(url);
            }
            Record::Ip { url, ip } => self.user(url).ip = ip,
            Record::JoinDate { url, date } => self.user(url).join_date = date,
            Record::LastModified { url, value } => self.user(url).last_modified = value,
            Record::Status { url, time, record } => {
                self.user(url).status.insert(time, record);
            }
            Record::Remote { index, url } => self.remotes.push((index, url)),
        }
    }

    /// Users plus the deduplicated peer list, in stored order.
    pub fn finish(mut self) -> RegistrySnapshot {
        self.remotes
            .sort_by_key(|(index, _)| index.unwrap_or(usize::MAX));
        let remotes = dedupe(self.remotes.into_iter().map(|(_, url)| url).collect());
        RegistrySnapshot {
            users: self.users.into_values().collect(),
            remotes,
        }
    }

    fn user(&mut self, url: String) -> &mut User {
        self.users
            .entry(url)
            .or_insert_with_key(|url| User::new("", url.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "https://a.example/twtxt.txt";

    fn sample_user() -> User {
        let mut user = User::new("alice", URL);
        user.join_date = Utc.with_ymd_and_hms(2023, 12, 31, 8, 0, 0).unwrap();
        user.last_modified = "Mon, 01 Jan 2024 00:00:00 GMT".into();
        user.ip = Some("192.0.2.7".parse().unwrap());
        user.status.insert(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            "alice\thttps://a.example/twtxt.txt\t2024-01-01T00:00:00Z\thello".into(),
        );
        user.status.insert(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::milliseconds(250),
            "alice\thttps://a.example/twtxt.txt\t2024-01-01T00:00:00.25Z\tfraction".into(),
        );
        user
    }

    #[test]
    fn test_key_layout() {
        let keys: Vec<String> = encode_user(&sample_user()).into_iter().map(|(key, _)| key).collect();
        assert!(keys.contains(&"https://a.example/twtxt.txt*Nick".to_string()));
        assert!(keys.contains(&"https://a.example/twtxt.txt*LastModified".to_string()));
        assert!(keys.contains(&"https://a.example/twtxt.txt*Status*2024-01-01T00:00:00Z".to_string()));
        assert!(keys.contains(&"https://a.example/twtxt.txt*Status*2024-01-01T00:00:00.250Z".to_string()));
        assert_eq!(keys.len(), 7);
    }

    #[test]
    fn test_entries_rebuild_snapshot() {
        let snapshot = RegistrySnapshot {
            users: vec![sample_user()],
            remotes: vec!["https://peer.example/api/plain/tweets".into()],
        };

        let mut builder = SnapshotBuilder::new();
        for (key, value) in encode_snapshot(&snapshot).into_iter().rev() {
            builder.apply(decode_entry(&key, &value).unwrap());
        }
        assert_eq!(builder.finish(), snapshot);
    }

    #[test]
    fn test_fractional_join_date_survives() {
        let mut user = sample_user();
        user.join_date += chrono::Duration::microseconds(123_456);
        let snapshot = RegistrySnapshot {
            users: vec![user.clone()],
            remotes: Vec::new(),
        };

        let mut from_entries = SnapshotBuilder::new();
        for (key, value) in encode_snapshot(&snapshot) {
            from_entries.apply(decode_entry(&key, &value).unwrap());
        }
        assert_eq!(from_entries.finish().users[0].join_date, user.join_date);

        let mut from_rows = SnapshotBuilder::new();
        for row in snapshot_rows(&snapshot) {
            from_rows.apply(decode_row(&row).unwrap());
        }
        assert_eq!(from_rows.finish().users[0].join_date, user.join_date);
    }

    #[test]
    fn test_rows_rebuild_snapshot() {
        let snapshot = RegistrySnapshot {
            users: vec![sample_user()],
            remotes: vec!["https://p1.example".into(), "https://p2.example".into()],
        };

        let mut builder = SnapshotBuilder::new();
        for row in snapshot_rows(&snapshot) {
            builder.apply(decode_row(&row).unwrap());
        }
        assert_eq!(builder.finish(), snapshot);
    }

    #[test]
    fn test_url_with_separator() {
        let url = "https://odd.example/*Status*/feed*Nick.txt";
        let record = decode_entry(&format!("{url}*Nick"), "odd").unwrap();
        assert_eq!(
            record,
            Record::Nick {
                url: url.to_string(),
                nick: "odd".into()
            }
        );

        let record = decode_entry(&format!("{url}*Status*2024-01-01T00:00:00Z"), "x").unwrap();
        assert!(matches!(record, Record::Status { url: u, .. } if u == url));
    }

    #[test]
    fn test_hostile_keys() {
        for key in [
            "",
            "no-separator",
            "*Nick",
            "https://a.example*Unknown",
            "https://a.example*Status*yesterday",
            "*Status*2024-01-01T00:00:00Z",
            "remote*first",
        ] {
            assert!(decode_entry(key, "v").is_err(), "{key:?} should not decode");
        }

        assert!(matches!(
            decode_entry("https://a.example*IP", "not-an-ip"),
            Err(CodecError::BadValue { .. })
        ));
        assert!(matches!(
            decode_entry("https://a.example*Date", "soon"),
            Err(CodecError::BadValue { .. })
        ));
    }

    #[test]
    fn test_nil_ip_decodes_to_none() {
        let record = decode_entry("https://a.example*IP", "<nil>").unwrap();
        assert_eq!(
            record,
            Record::Ip {
                url: "https://a.example".into(),
                ip: None
            }
        );
    }

    #[test]
    fn test_remotes_sorted_and_deduped() {
        let mut builder = SnapshotBuilder::new();
        for (key, value) in [
            ("remote*10", "https://k.example"),
            ("remote*2", "https://b.example"),
            ("remote*0", "https://a.example"),
            ("remote*3", "https://a.example"),
        ] {
            builder.apply(decode_entry(key, value).unwrap());
        }
        assert_eq!(
            builder.finish().remotes,
            vec!["https://a.example", "https://b.example", "https://k.example"]
        );
    }
}
