// src/pipeline/crawl.rs

//! Feed and peer-registry crawling.
//!
//! A refresh sweep re-checks every registered feed with bounded
//! concurrency, then pulls new users from every known peer registry.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::registry::{Registry, RemoteRegistries};
use crate::services::fetcher::is_registry_dump_url;
use crate::services::{parse_registry_feed, parse_user_feed};
use crate::utils::is_http_url;

/// Counters for one refresh sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Feeds visited
    pub checked: usize,
    /// Feeds that reported changes and were re-fetched
    pub updated: usize,
    /// Feeds that reported no change
    pub unchanged: usize,
    /// Feeds that could not be refreshed
    pub failed: usize,
    /// Statuses added across all updated feeds
    pub new_statuses: usize,
    pub peers_crawled: usize,
    pub peer_failures: usize,
    /// Users first seen on a peer registry during this sweep
    pub users_discovered: usize,
    pub elapsed: Duration,
}

/// What a submission added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A single user's feed, with the number of statuses parsed from it
    User { url: String, statuses: usize },
    /// A peer registry, with the number of users it contributed
    Peer { url: String, users_discovered: usize },
}

/// Drives updates of the registry from remote feeds.
#[derive(Debug, Clone)]
pub struct Crawler {
    registry: Arc<Registry>,
    remotes: Arc<RemoteRegistries>,
    instance_url: String,
    max_concurrent: usize,
}

impl Crawler {
    pub fn new(registry: Arc<Registry>, remotes: Arc<RemoteRegistries>, config: &Config) -> Self {
        Self {
            registry,
            remotes,
            instance_url: config.instance.url.trim_end_matches('/').to_string(),
            max_concurrent: config.crawler.max_concurrent.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn remotes(&self) -> &Arc<RemoteRegistries> {
        &self.remotes
    }

    /// Re-check every registered feed, then crawl every known peer.
    ///
    /// Individual failures are logged and counted; the sweep always runs
    /// to completion.
    pub async fn refresh_all(&self) -> RefreshSummary {
        let started = Instant::now();
        let urls = self.registry.urls();
        let mut summary = RefreshSummary {
            checked: urls.len(),
            ..RefreshSummary::default()
        };

        let registry = &self.registry;
        let mut updates = stream::iter(urls)
            .map(|url| async move {
                let result = registry.update_user(&url).await;
                (url, result)
            })
            .buffer_unordered(self.max_concurrent);

        while let Some((url, result)) = updates.next().await {
            match result {
                Ok(added) => {
                    summary.updated += 1;
                    summary.new_statuses += added;
                }
                Err(e) if e.is_no_new_statuses() => {
                    summary.unchanged += 1;
                    log::debug!("{}", e);
                }
                Err(e) => {
                    summary.failed += 1;
                    log::warn!("Failed to refresh {}: {}", url, e);
                }
            }
        }

        for peer in self.remotes.list() {
            match self.crawl_peer_registry(&peer).await {
                Ok(discovered) => {
                    summary.peers_crawled += 1;
                    summary.users_discovered += discovered;
                }
                Err(e) => {
                    summary.peer_failures += 1;
                    log::warn!("Error refreshing local copy of peer registry {}: {}", peer, e);
                }
            }
        }

        summary.elapsed = started.elapsed();
        log::info!(
            "Refreshed {} feeds ({} updated, {} unchanged, {} failed), {} peers, {} new users in {:.2?}",
            summary.checked,
            summary.updated,
            summary.unchanged,
            summary.failed,
            summary.peers_crawled,
            summary.users_discovered,
            summary.elapsed
        );
        summary
    }

    /// Import users from a peer registry's dump.
    ///
    /// Only users not already registered are inserted; returns how many.
    pub async fn crawl_peer_registry(&self, url: &str) -> Result<usize> {
        let feed = self.registry.fetcher().fetch_feed(url).await?;
        if !feed.is_registry_dump {
            return Err(AppError::not_a_registry(
                url,
                "can't add single user via call to crawl_peer_registry",
            ));
        }

        let parsed = parse_registry_feed(&feed.body)?;
        parsed.warn_soft_errors(url);

        let inserted = self.registry.insert_missing(parsed.value);
        log::debug!("Crawled peer {}: {} new users", url, inserted);
        Ok(inserted)
    }

    /// Record a peer registry and crawl it right away.
    pub async fn add_peer_registry(&self, url: &str) -> Result<usize> {
        self.check_not_self(url)?;
        if !is_http_url(url) {
            return Err(AppError::invalid_url(url));
        }
        if !is_registry_dump_url(url) {
            return Err(AppError::not_a_registry(
                url,
                "peer registries must point at their /api/plain/tweets endpoint",
            ));
        }

        if self.remotes.add(url) {
            log::info!("Added peer registry {}", url);
        }
        self.crawl_peer_registry(url).await
    }

    /// Add a user feed or a peer registry, depending on the URL.
    pub async fn submit(&self, nick: &str, url: &str, ip: Option<IpAddr>) -> Result<Submission> {
        if url.is_empty() {
            return Err(AppError::validation("both URL and nick must be specified"));
        }
        self.check_not_self(url)?;
        if !is_http_url(url) {
            return Err(AppError::invalid_url(url));
        }

        if is_registry_dump_url(url) {
            let users_discovered = self.add_peer_registry(url).await?;
            return Ok(Submission::Peer {
                url: url.to_string(),
                users_discovered,
            });
        }

        if nick.is_empty() {
            return Err(AppError::validation("both URL and nick must be specified"));
        }
        if self.registry.contains(url) {
            return Err(AppError::UserExists(url.to_string()));
        }

        let feed = self.registry.fetcher().fetch_feed(url).await?;
        let parsed = parse_user_feed(&feed.body, nick, url)?;
        parsed.warn_soft_errors(url);

        let statuses = parsed.value.len();
        self.registry.add_user(nick, url, ip, parsed.value)?;
        Ok(Submission::User {
            url: url.to_string(),
            statuses,
        })
    }

    fn check_not_self(&self, url: &str) -> Result<()> {
        if !self.instance_url.is_empty() && url.contains(&self.instance_url) {
            return Err(AppError::SelfSubmission(url.to_string()));
        }
        Ok(())
    }
}
