//! Concurrency-safe user index.
//!
//! Locking discipline: the registry-wide lock guards the structure of the
//! user map, each user carries its own lock for its fields. Locks are
//! always taken registry first, then user, and neither is held across
//! network I/O: callers that visit every user take a snapshot of the keys,
//! release the map, and look each user up again on its own.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{AppError, Result};
use crate::models::{StatusMap, User};
use crate::services::{FeedDiff, Fetcher, parse_user_feed};
use crate::utils::is_http_url;

/// A user behind its own lock.
pub type SharedUser = Arc<RwLock<User>>;

/// In-memory index of registered users keyed by feed URL.
#[derive(Debug)]
pub struct Registry {
    pub(super) users: RwLock<HashMap<String, SharedUser>>,
    fetcher: Fetcher,
}

impl Registry {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            fetcher,
        }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Register a new user. Fails if the URL is already present.
    pub fn add_user(
        &self,
        nick: &str,
        url: &str,
        ip: Option<IpAddr>,
        statuses: StatusMap,
    ) -> Result<()> {
        if nick.is_empty() || url.is_empty() {
            return Err(AppError::validation("both URL and nick must be specified"));
        }
        if !is_http_url(url) {
            return Err(AppError::invalid_url(url));
        }

        let mut users = self.users.write();
        if users.contains_key(url) {
            return Err(AppError::UserExists(url.to_string()));
        }

        let user = User::new(nick, url).with_ip(ip).with_statuses(statuses);
        users.insert(url.to_string(), Arc::new(RwLock::new(user)));
        log::info!("Added user {} ({})", nick, url);
        Ok(())
    }

    /// Remove a user and all of its statuses.
    pub fn del_user(&self, url: &str) -> Result<User> {
        if url.is_empty() {
            return Err(AppError::validation("can't delete blank user"));
        }
        let removed = self
            .users
            .write()
            .remove(url)
            .ok_or_else(|| AppError::UserNotFound(url.to_string()))?;
        let user = removed.read().clone();
        Ok(user)
    }

    /// Copy of a user's current record.
    pub fn get(&self, url: &str) -> Result<User> {
        let handle = self.handle(url)?;
        let user = handle.read().clone();
        Ok(user)
    }

    /// Insert or replace a user keyed by its URL.
    pub fn put(&self, user: User) -> Result<()> {
        if user.url.is_empty() {
            return Err(AppError::validation("can't put user without a URL key"));
        }
        let key = user.url.clone();
        self.users.write().insert(key, Arc::new(RwLock::new(user)));
        Ok(())
    }

    /// Insert users whose URL isn't registered yet; existing users are
    /// left untouched. Returns how many were inserted.
    pub fn insert_missing(&self, incoming: Vec<User>) -> usize {
        let mut users = self.users.write();
        let mut inserted = 0;
        for user in incoming {
            if users.contains_key(&user.url) || user.url.is_empty() {
                continue;
            }
            users.insert(user.url.clone(), Arc::new(RwLock::new(user)));
            inserted += 1;
        }
        inserted
    }

    /// Re-check a user's feed and merge any new statuses.
    ///
    /// Returns the number of statuses that were not present before.
    /// `AppError::NoNewStatuses` means the remote reported no change.
    pub async fn update_user(&self, url: &str) -> Result<usize> {
        if !is_http_url(url) {
            return Err(AppError::invalid_url(url));
        }

        let (nick, stored_last_modified) = {
            let handle = self.handle(url)?;
            let user = handle.read();
            (user.nick.clone(), user.last_modified.clone())
        };

        let last_modified = match self.fetcher.diff_feed(url, &stored_last_modified).await? {
            FeedDiff::Unchanged => return Err(AppError::NoNewStatuses(url.to_string())),
            FeedDiff::Changed { last_modified } => last_modified,
        };

        let feed = self.fetcher.fetch_feed(url).await?;
        if feed.is_registry_dump {
            return Err(AppError::not_a_registry(
                url,
                "attempting to update registry URL - users should be updated individually",
            ));
        }

        let parsed = parse_user_feed(&feed.body, &nick, url)?;
        parsed.warn_soft_errors(url);

        let handle = self.handle(url)?;
        let mut user = handle.write();
        if let Some(last_modified) = last_modified {
            user.last_modified = last_modified;
        }
        Ok(user.merge_statuses(parsed.value))
    }

    /// Copy of one user's statuses.
    pub fn get_user_statuses(&self, url: &str) -> Result<StatusMap> {
        let handle = self.handle(url)?;
        let statuses = handle.read().status.clone();
        Ok(statuses)
    }

    /// All statuses merged into one map. Identical timestamps from
    /// different users collapse to a single entry.
    pub fn get_statuses(&self) -> StatusMap {
        let users = self.users.read();
        let mut merged = StatusMap::new();
        for handle in users.values() {
            let user = handle.read();
            merged.extend(user.status.iter().map(|(k, v)| (*k, v.clone())));
        }
        merged
    }

    /// Snapshot of registered URLs.
    pub fn urls(&self) -> Vec<String> {
        self.users.read().keys().cloned().collect()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.users.read().contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    /// Copies of every user, for persistence.
    pub fn snapshot_users(&self) -> Vec<User> {
        let users = self.users.read();
        users.values().map(|handle| handle.read().clone()).collect()
    }

    /// Load users from persistence.
    ///
    /// Unknown URLs are inserted as stored. Users already in the index keep
    /// their fields and gain any persisted statuses they lack, so a stale
    /// store never rolls history back.
    pub fn load_users(&self, incoming: Vec<User>) -> Result<usize> {
        if incoming.iter().any(|user| user.url.is_empty()) {
            return Err(AppError::validation("can't load user without a URL key"));
        }

        let count = incoming.len();
        let mut users = self.users.write();
        for user in incoming {
            match users.entry(user.url.clone()) {
                Entry::Occupied(entry) => {
                    let mut existing = entry.get().write();
                    if existing.last_modified.is_empty() {
                        existing.last_modified = user.last_modified;
                    }
                    if existing.ip.is_none() {
                        existing.ip = user.ip;
                    }
                    for (time, record) in user.status {
                        existing.status.entry(time).or_insert(record);
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(RwLock::new(user)));
                }
            }
        }
        Ok(count)
    }

    /// Clone of the shared handle for `url`; the map lock is released on return.
    fn handle(&self, url: &str) -> Result<SharedUser> {
        if url.is_empty() {
            return Err(AppError::validation("no URL key provided"));
        }
        self.users
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::UserNotFound(url.to_string()))
    }
}
