//! User records and registry snapshots.

use std::net::IpAddr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::status::StatusMap;

/// A registered feed and the statuses fetched from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User-specified nickname
    pub nick: String,

    /// URL of the user's feed (registry key)
    pub url: String,

    /// Raw `Last-Modified` header from the previous fetch, used for
    /// conditional requests
    #[serde(default)]
    pub last_modified: String,

    /// Address the feed was submitted from, when known
    #[serde(default)]
    pub ip: Option<IpAddr>,

    /// When the user was added to the registry
    pub join_date: DateTime<Utc>,

    /// Statuses keyed by post timestamp
    #[serde(default)]
    pub status: StatusMap,
}

impl User {
    /// Create a user joined now.
    pub fn new(nick: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            url: url.into(),
            last_modified: String::new(),
            ip: None,
            join_date: Utc::now().trunc_subsecs(0),
            status: StatusMap::new(),
        }
    }

    pub fn with_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.ip = ip;
        self
    }

    pub fn with_statuses(mut self, status: StatusMap) -> Self {
        self.status = status;
        self
    }

    /// Merge statuses into this user. Existing entries with the same
    /// timestamp are overwritten; nothing is removed.
    pub fn merge_statuses(&mut self, statuses: StatusMap) -> usize {
        let mut added = 0;
        for (time, record) in statuses {
            if self.status.insert(time, record).is_none() {
                added += 1;
            }
        }
        added
    }
}

/// Plain-data copy of the whole registry, exchanged with storage backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub users: Vec<User>,
    pub remotes: Vec<String>,
}

impl RegistrySnapshot {
    /// Sort users by URL and remotes lexically so snapshots compare
    /// independent of map iteration order.
    pub fn normalized(mut self) -> Self {
        self.users.sort_by(|a, b| a.url.cmp(&b.url));
        self.remotes.sort();
        self
    }

    /// Total status count across all users.
    pub fn status_count(&self) -> usize {
        self.users.iter().map(|u| u.status.len()).sum()
    }
}
