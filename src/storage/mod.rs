//! Persistence of the registry index.
//!
//! The in-memory index is the source of truth; backends hold a copy that
//! is refreshed by periodic full-snapshot pushes and read back once at
//! startup.
//!
//! - `codec`: the flat key scheme and relational row mapping
//! - `kv`: embedded key-value file
//! - `sqlite`: relational table via rusqlite

pub mod codec;
pub mod kv;
pub mod sqlite;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{RegistrySnapshot, User};
use crate::registry::{Registry, RemoteRegistries};

pub use kv::KvBackend;
pub use sqlite::SqliteBackend;

/// Supported storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Flat key-value file
    Kv,
    /// SQLite table
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kv" | "leveldb" => Ok(BackendKind::Kv),
            "sqlite" | "sqlite3" => Ok(BackendKind::Sqlite),
            other => Err(AppError::config(format!("unknown database type: {other:?}"))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Kv => write!(f, "kv"),
            BackendKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Trait for registry storage backends.
#[async_trait]
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Write a full snapshot of the registry.
    async fn push(&mut self, snapshot: &RegistrySnapshot) -> Result<()>;

    /// Read back everything stored.
    ///
    /// Undecodable entries are logged and skipped; peers come back
    /// deduplicated.
    async fn pull(&mut self) -> Result<RegistrySnapshot>;

    /// Remove every stored entry belonging to `user`.
    async fn delete_user(&mut self, user: &User) -> Result<()>;

    /// Release the underlying resources.
    async fn close(&mut self) -> Result<()>;
}

/// Open a backend of the given kind at `path`.
pub async fn open_backend(kind: BackendKind, path: &Path) -> Result<Box<dyn Backend>> {
    let backend: Box<dyn Backend> = match kind {
        BackendKind::Kv => Box::new(KvBackend::open(path).await?),
        BackendKind::Sqlite => Box::new(SqliteBackend::open(path).await?),
    };
    log::info!("Opened {} database at {}", kind, path.display());
    Ok(backend)
}

/// Copy the index and peer list into plain data.
///
/// Registry and user locks are held only while copying.
pub fn snapshot(registry: &Registry, remotes: &RemoteRegistries) -> RegistrySnapshot {
    RegistrySnapshot {
        users: registry.snapshot_users(),
        remotes: remotes.list(),
    }
}

/// Exclusive owner of the open backend, if any.
#[derive(Default)]
pub struct Store {
    backend: Mutex<Option<Box<dyn Backend>>>,
}

impl Store {
    /// A store with no backend attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a backend, replacing (and closing) any previous one.
    pub async fn open(&self, kind: BackendKind, path: &Path) -> Result<()> {
        let backend = open_backend(kind, path).await?;
        let previous = self.backend.lock().await.replace(backend);
        if let Some(mut previous) = previous {
            log::warn!("Replacing open {} database without a final push", previous.kind());
            previous.close().await?;
        }
        Ok(())
    }

    /// Attach an already opened backend in place of the current one.
    ///
    /// The previous backend, if any, receives a final push and is closed
    /// after the new one is installed; its errors are returned but the new
    /// backend stays attached.
    pub async fn swap(
        &self,
        backend: Box<dyn Backend>,
        registry: &Registry,
        remotes: &RemoteRegistries,
    ) -> Result<()> {
        let previous = self.backend.lock().await.replace(backend);
        let Some(mut previous) = previous else {
            return Ok(());
        };

        let snapshot = snapshot(registry, remotes);
        let pushed = previous.push(&snapshot).await;
        let released = previous.close().await;
        log::info!("Closed {} database", previous.kind());
        pushed.and(released)
    }

    pub async fn is_open(&self) -> bool {
        self.backend.lock().await.is_some()
    }

    pub async fn kind(&self) -> Option<BackendKind> {
        self.backend.lock().await.as_ref().map(|b| b.kind())
    }

    /// Push a fresh snapshot of the index.
    pub async fn push(&self, registry: &Registry, remotes: &RemoteRegistries) -> Result<()> {
        let snapshot = snapshot(registry, remotes);
        let mut guard = self.backend.lock().await;
        let backend = guard.as_mut().ok_or_else(closed)?;
        backend.push(&snapshot).await?;
        log::debug!(
            "Pushed {} users, {} statuses, {} peers",
            snapshot.users.len(),
            snapshot.status_count(),
            snapshot.remotes.len()
        );
        Ok(())
    }

    /// Load persisted state into the index and peer list.
    ///
    /// Persisted users are merged into the index without replacing users it
    /// already holds; peers are appended to the known list.
    pub async fn pull(
        &self,
        registry: &Registry,
        remotes: &RemoteRegistries,
    ) -> Result<RegistrySnapshot> {
        let snapshot = {
            let mut guard = self.backend.lock().await;
            let backend = guard.as_mut().ok_or_else(closed)?;
            backend.pull().await?
        };

        registry.load_users(snapshot.users.clone())?;
        remotes.extend(snapshot.remotes.clone());
        log::info!(
            "Loaded {} users and {} peers from storage",
            snapshot.users.len(),
            snapshot.remotes.len()
        );
        Ok(snapshot)
    }

    /// Remove a user's persisted entries.
    pub async fn delete_user(&self, user: &User) -> Result<()> {
        let mut guard = self.backend.lock().await;
        let backend = guard.as_mut().ok_or_else(closed)?;
        backend.delete_user(user).await
    }

    /// Final push, then close and detach the backend.
    ///
    /// Closing an already closed store is a no-op.
    pub async fn close(&self, registry: &Registry, remotes: &RemoteRegistries) -> Result<()> {
        let snapshot = snapshot(registry, remotes);
        let Some(mut backend) = self.backend.lock().await.take() else {
            return Ok(());
        };

        let pushed = backend.push(&snapshot).await;
        let released = backend.close().await;
        log::info!("Closed {} database", backend.kind());
        pushed.and(released)
    }
}

fn closed() -> AppError {
    AppError::storage("database is not open")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::status::make_record;
    use crate::models::{CrawlerConfig, StatusMap};
    use crate::services::Fetcher;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn registry() -> Registry {
        Registry::new(Fetcher::new(&CrawlerConfig::default()).unwrap())
    }

    fn seeded() -> (Registry, RemoteRegistries) {
        let registry = registry();
        let url = "https://a.example/twtxt.txt";
        let statuses = StatusMap::from([(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            make_record("alice", url, "2024-01-01T00:00:00Z", "hello"),
        )]);
        registry
            .add_user("alice", url, Some("192.0.2.1".parse().unwrap()), statuses)
            .unwrap();

        let remotes = RemoteRegistries::new();
        remotes.add("https://peer.example/api/plain/tweets");
        (registry, remotes)
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("kv".parse::<BackendKind>().unwrap(), BackendKind::Kv);
        assert_eq!("LevelDB".parse::<BackendKind>().unwrap(), BackendKind::Kv);
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert!(matches!(
            "postgres".parse::<BackendKind>(),
            Err(AppError::Config(_))
        ));
        assert_eq!(BackendKind::Sqlite.to_string(), "sqlite");
    }

    #[tokio::test]
    async fn test_closed_store_rejects_io() {
        let store = Store::new();
        let (registry, remotes) = seeded();
        assert!(!store.is_open().await);
        assert!(store.push(&registry, &remotes).await.is_err());
        assert!(store.pull(&registry, &remotes).await.is_err());
        // closing twice is fine
        store.close(&registry, &remotes).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_round_trip_both_kinds() {
        for kind in [BackendKind::Kv, BackendKind::Sqlite] {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("registry.db");
            let (registry, remotes) = seeded();

            let store = Store::new();
            store.open(kind, &path).await.unwrap();
            assert_eq!(store.kind().await, Some(kind));
            store.close(&registry, &remotes).await.unwrap();
            assert!(!store.is_open().await);

            let restored = self::registry();
            let restored_remotes = RemoteRegistries::new();
            store.open(kind, &path).await.unwrap();
            store.pull(&restored, &restored_remotes).await.unwrap();

            assert_eq!(
                snapshot(&restored, &restored_remotes).normalized(),
                snapshot(&registry, &remotes).normalized(),
                "{kind} round trip"
            );
        }
    }

    #[tokio::test]
    async fn test_swap_pushes_to_previous_backend() {
        let dir = TempDir::new().unwrap();
        let kv_path = dir.path().join("registry.db");
        let sqlite_path = dir.path().join("registry.sqlite");
        let (registry, remotes) = seeded();

        let store = Store::new();
        store.open(BackendKind::Kv, &kv_path).await.unwrap();
        let next = open_backend(BackendKind::Sqlite, &sqlite_path).await.unwrap();
        store.swap(next, &registry, &remotes).await.unwrap();
        assert_eq!(store.kind().await, Some(BackendKind::Sqlite));

        let mut old = KvBackend::open(&kv_path).await.unwrap();
        assert_eq!(old.pull().await.unwrap().users.len(), 1);
        store.close(&registry, &remotes).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_delete_user() {
        for kind in [BackendKind::Kv, BackendKind::Sqlite] {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("registry.db");
            let (registry, remotes) = seeded();

            let store = Store::new();
            store.open(kind, &path).await.unwrap();
            store.push(&registry, &remotes).await.unwrap();

            let alice = registry.del_user("https://a.example/twtxt.txt").unwrap();
            store.delete_user(&alice).await.unwrap();

            let restored = self::registry();
            let restored_remotes = RemoteRegistries::new();
            store.pull(&restored, &restored_remotes).await.unwrap();
            assert!(restored.is_empty(), "{kind} kept a deleted user");
            assert_eq!(restored_remotes.len(), 1);
        }
    }
}
