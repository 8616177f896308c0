// src/config.rs

//! Configuration loading utilities.
//!
//! `load_config` reads and validates the TOML file the binary runs from;
//! `ConfigWatcher` reports edits to it so a long-running instance can
//! reload without a restart.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Config;

#[cfg(feature = "cli")]
pub use watch::ConfigWatcher;

/// Load and validate a configuration file.
///
/// A missing file yields the defaults; a file that exists but does not
/// parse or validate is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::load(path)
            .map_err(|e| AppError::config(format!("failed to load {}: {}", path.display(), e)))?
    } else {
        log::warn!("No config file at {}, using defaults", path.display());
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "cli")]
mod watch {
    use std::ffi::OsString;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
    use tokio::sync::mpsc;

    use crate::error::{AppError, Result};

    /// Quiet period used to fold an editor's burst of writes into one change.
    const SETTLE: Duration = Duration::from_millis(250);

    /// Watches a single config file for modification.
    pub struct ConfigWatcher {
        path: PathBuf,
        _watcher: RecommendedWatcher,
        rx: mpsc::UnboundedReceiver<()>,
    }

    impl ConfigWatcher {
        /// Start watching `path`.
        ///
        /// The parent directory is watched so that editors which replace the
        /// file instead of writing in place are still noticed.
        pub fn new(path: &Path) -> Result<Self> {
            let file_name: OsString = path
                .file_name()
                .ok_or_else(|| AppError::config(format!("not a file path: {}", path.display())))?
                .to_os_string();
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };

            let (tx, rx) = mpsc::unbounded_channel();
            let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
                match res {
                    Ok(event) => {
                        let relevant = (event.kind.is_modify() || event.kind.is_create())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(file_name.as_os_str()));
                        if relevant {
                            let _ = tx.send(());
                        }
                    }
                    Err(e) => log::warn!("Config watcher error: {}", e),
                }
            })
            .map_err(|e| AppError::config(format!("can't watch config: {e}")))?;

            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| AppError::config(format!("can't watch {}: {}", dir.display(), e)))?;

            Ok(Self {
                path: path.to_path_buf(),
                _watcher: watcher,
                rx,
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Wait for the next change. Returns `None` once the watcher is gone.
        pub async fn changed(&mut self) -> Option<()> {
            self.rx.recv().await?;
            tokio::time::sleep(SETTLE).await;
            while self.rx.try_recv().is_ok() {}
            Some(())
        }
    }
}
