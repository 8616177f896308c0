// src/service.rs

//! Registry service facade.
//!
//! Owns the index, the peer list, the storage handle and the scheduler,
//! and exposes the operations an HTTP adapter or the CLI needs. Nothing in
//! here is global: every piece of shared state hangs off one
//! `RegistryService` value.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{Config, RegistrySnapshot, StatusMap, User};
use crate::pipeline::{Crawler, RefreshSummary, Scheduler, Submission};
use crate::registry::{self, Registry, RemoteRegistries};
use crate::services::Fetcher;
use crate::storage::{self, Store};

/// Running registry instance.
pub struct RegistryService {
    config: RwLock<Config>,
    registry: Arc<Registry>,
    remotes: Arc<RemoteRegistries>,
    store: Arc<Store>,
    crawler: RwLock<Crawler>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl RegistryService {
    /// Build an idle service: no storage attached, no background tasks.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let fetcher = Fetcher::new(&config.crawler)?;
        let registry = Arc::new(Registry::new(fetcher));
        let remotes = Arc::new(RemoteRegistries::new());
        let crawler = Crawler::new(Arc::clone(&registry), Arc::clone(&remotes), &config);

        Ok(Self {
            config: RwLock::new(config),
            registry,
            remotes,
            store: Arc::new(Store::new()),
            crawler: RwLock::new(crawler),
            scheduler: Mutex::new(None),
        })
    }

    /// Build a service and load persisted state, without background tasks.
    ///
    /// Failing to open storage is fatal.
    pub async fn open(config: Config) -> Result<Self> {
        let service = Self::new(config)?;
        service.open_store().await?;
        Ok(service)
    }

    /// Open storage, load persisted state and start the scheduler.
    pub async fn start(config: Config) -> Result<Self> {
        let service = Self::open(config).await?;
        service.start_scheduler().await;
        Ok(service)
    }

    /// Apply a new configuration.
    ///
    /// The new backend is opened first. If that fails the scheduler is
    /// restarted on the current backend and configuration, and the error is
    /// returned. Otherwise the old backend gets a final push and is closed,
    /// the configuration is rebound, the new backend is pulled from and the
    /// scheduler restarts with the new intervals.
    pub async fn configure(&self, config: Config) -> Result<()> {
        config.validate()?;
        let kind = config.database.backend_kind()?;
        log::info!("Reloading configuration");

        self.stop_scheduler().await;
        let backend = match storage::open_backend(kind, &config.database.path).await {
            Ok(backend) => backend,
            Err(e) => {
                log::error!(
                    "Can't open {} database at {}, keeping current configuration",
                    kind,
                    config.database.path.display()
                );
                self.start_scheduler().await;
                return Err(e);
            }
        };
        if let Err(e) = self.store.swap(backend, &self.registry, &self.remotes).await {
            log::error!("Final push before reload failed: {}", e);
        }

        if config.crawler != self.config.read().crawler {
            log::warn!("Crawler HTTP settings take effect on the next restart");
        }
        *self.crawler.write() =
            Crawler::new(Arc::clone(&self.registry), Arc::clone(&self.remotes), &config);
        *self.config.write() = config;

        let pulled = self.store.pull(&self.registry, &self.remotes).await;
        self.start_scheduler().await;
        pulled.map(|_| ())
    }

    /// Stop background tasks, push once more and close storage.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_scheduler().await;
        self.store.close(&self.registry, &self.remotes).await
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn remotes(&self) -> &Arc<RemoteRegistries> {
        &self.remotes
    }

    pub fn crawler(&self) -> Crawler {
        self.crawler.read().clone()
    }

    pub async fn is_scheduled(&self) -> bool {
        self.scheduler
            .lock()
            .await
            .as_ref()
            .is_some_and(Scheduler::is_running)
    }

    /// Run one refresh sweep now.
    pub async fn refresh(&self) -> RefreshSummary {
        self.crawler().refresh_all().await
    }

    /// Push the index to storage now.
    pub async fn push(&self) -> Result<()> {
        self.store.push(&self.registry, &self.remotes).await
    }

    /// Plain-data copy of the current index and peers.
    pub fn snapshot(&self) -> RegistrySnapshot {
        storage::snapshot(&self.registry, &self.remotes)
    }

    pub async fn submit(&self, nick: &str, url: &str, ip: Option<IpAddr>) -> Result<Submission> {
        self.crawler().submit(nick, url, ip).await
    }

    pub fn add_user(
        &self,
        nick: &str,
        url: &str,
        ip: Option<IpAddr>,
        statuses: StatusMap,
    ) -> Result<()> {
        self.registry.add_user(nick, url, ip, statuses)
    }

    /// Remove a user from the index and from storage.
    pub async fn delete_user(&self, url: &str) -> Result<User> {
        let user = self.registry.del_user(url)?;
        if self.store.is_open().await {
            self.store.delete_user(&user).await?;
        }
        log::info!("Deleted user {} ({})", user.nick, user.url);
        Ok(user)
    }

    pub async fn crawl_peer_registry(&self, url: &str) -> Result<usize> {
        self.crawler().crawl_peer_registry(url).await
    }

    pub async fn add_peer_registry(&self, url: &str) -> Result<usize> {
        self.crawler().add_peer_registry(url).await
    }

    pub fn query_user(&self, term: &str) -> Vec<String> {
        self.registry.query_user(term)
    }

    pub fn query_in_status(&self, needle: &str) -> Result<Vec<String>> {
        self.registry.query_in_status(needle)
    }

    pub fn query_all_statuses(&self) -> Vec<String> {
        self.registry.query_all_statuses()
    }

    pub async fn query_tag(&self, tag: &str) -> Result<Vec<String>> {
        self.registry.query_tag(tag).await
    }

    pub fn query_tagged(&self) -> Vec<String> {
        self.registry.query_tagged()
    }

    pub fn query_mentions(&self, url: &str) -> Result<Vec<String>> {
        self.registry.query_mentions(url)
    }

    pub fn reduce_to_page<'a, T>(&self, page: i64, data: &'a [T]) -> &'a [T] {
        registry::reduce_to_page(page, data)
    }

    async fn open_store(&self) -> Result<()> {
        let (kind, path) = {
            let config = self.config.read();
            (config.database.backend_kind()?, config.database.path.clone())
        };
        self.store.open(kind, &path).await?;
        self.store.pull(&self.registry, &self.remotes).await?;
        Ok(())
    }

    async fn start_scheduler(&self) {
        let (refresh_every, push_every) = {
            let config = self.config.read();
            (config.schedule.refresh_interval(), config.schedule.push_interval())
        };
        let scheduler = Scheduler::start(
            refresh_every,
            push_every,
            self.crawler(),
            Arc::clone(&self.store),
        );
        let previous = self.scheduler.lock().await.replace(scheduler);
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    async fn stop_scheduler(&self) {
        let scheduler = self.scheduler.lock().await.take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
    }
}
