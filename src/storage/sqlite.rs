//! SQLite backend.
//!
//! One table, one row per user field, status or peer:
//!
//! ```sql
//! registry (id, urlKey, isUser, dataKey, data, UNIQUE(urlKey, dataKey))
//! ```
//!
//! rusqlite is blocking, so every call runs on the blocking pool.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, params};

use super::codec::{self, Row, SnapshotBuilder};
use super::{Backend, BackendKind};
use crate::error::{AppError, Result};
use crate::models::{RegistrySnapshot, User};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS registry (
    id INTEGER PRIMARY KEY,
    urlKey TEXT NOT NULL,
    isUser BOOL NOT NULL,
    dataKey TEXT NOT NULL,
    data BLOB,
    UNIQUE(urlKey, dataKey)
);
";

const UPSERT: &str =
    "INSERT OR REPLACE INTO registry (urlKey, isUser, dataKey, data) VALUES (?1, ?2, ?3, ?4)";

/// Relational backend on a single SQLite file.
#[derive(Debug)]
pub struct SqliteBackend {
    path: PathBuf,
    conn: Option<Arc<Mutex<Connection>>>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path` and ensure the schema.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let db_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            path,
            conn: Some(Arc::new(Mutex::new(conn))),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self
            .conn
            .clone()
            .ok_or_else(|| AppError::storage("database is closed"))?;
        tokio::task::spawn_blocking(move || f(&mut conn.lock())).await?
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn push(&mut self, snapshot: &RegistrySnapshot) -> Result<()> {
        let rows = codec::snapshot_rows(snapshot);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(UPSERT)?;
                for row in &rows {
                    stmt.execute(params![row.url_key, row.is_user, row.data_key, row.data])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn pull(&mut self) -> Result<RegistrySnapshot> {
        let rows = self
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare("SELECT urlKey, isUser, dataKey, data FROM registry ORDER BY id")?;
                let rows = stmt
                    .query_map([], |r| {
                        Ok(Row {
                            url_key: r.get(0)?,
                            is_user: r.get(1)?,
                            data_key: r.get(2)?,
                            data: r.get::<_, Option<Vec<u8>>>(3)?.unwrap_or_default(),
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut builder = SnapshotBuilder::new();
        for row in &rows {
            match codec::decode_row(row) {
                Ok(record) => builder.apply(record),
                Err(e) => log::warn!("Skipping stored row: {}", e),
            }
        }
        Ok(builder.finish())
    }

    async fn delete_user(&mut self, user: &User) -> Result<()> {
        let url = user.url.clone();
        let deleted = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM registry WHERE isUser = 1 AND urlKey = ?1",
                    params![url],
                )?)
            })
            .await?;
        log::debug!("Deleted {} rows for {}", deleted, user.url);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || match Arc::try_unwrap(conn) {
            Ok(conn) => conn
                .into_inner()
                .close()
                .map_err(|(_, e)| AppError::Sqlite(e)),
            Err(_) => Ok(()),
        })
        .await??;
        log::debug!("Closed SQLite database {}", self.path.display());
        Ok(())
    }
}
