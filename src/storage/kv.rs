//! Embedded key-value backend.
//!
//! Entries live in memory as a sorted map and are mirrored to a single
//! JSON file. Each write replaces the file atomically (temp file, then
//! rename), so a crash never leaves a half-written database behind.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::codec::{self, SnapshotBuilder};
use super::{Backend, BackendKind};
use crate::error::{AppError, Result};
use crate::models::{RegistrySnapshot, User};

/// Flat key-value file backend.
#[derive(Debug)]
pub struct KvBackend {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl KvBackend {
    /// Open the database at `path`, creating it on first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AppError::storage(format!("corrupt database {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(AppError::Io(e)),
        };
        Ok(Self { path, entries })
    }

    /// Write the entries atomically (write to temp, then rename).
    async fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec(&self.entries)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for KvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kv
    }

    async fn push(&mut self, snapshot: &RegistrySnapshot) -> Result<()> {
        self.entries.extend(codec::encode_snapshot(snapshot));
        self.flush().await
    }

    async fn pull(&mut self) -> Result<RegistrySnapshot> {
        let mut builder = SnapshotBuilder::new();
        for (key, value) in &self.entries {
            match codec::decode_entry(key, value) {
                Ok(record) => builder.apply(record),
                Err(e) => log::warn!("Skipping stored entry: {}", e),
            }
        }
        Ok(builder.finish())
    }

    async fn delete_user(&mut self, user: &User) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|key, value| {
            codec::decode_entry(key, value)
                .map(|record| record.user_url() != Some(user.url.as_str()))
                .unwrap_or(true)
        });
        log::debug!(
            "Deleted {} entries for {}",
            before - self.entries.len(),
            user.url
        );
        self.flush().await
    }

    async fn close(&mut self) -> Result<()> {
        self.flush().await
    }
}
