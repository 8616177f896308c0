// src/pipeline/scheduler.rs

//! Periodic refresh and persistence.
//!
//! Two background tasks share one cancellation token: one runs refresh
//! sweeps, the other pushes the index to storage. Both fire first after a
//! full period, never immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Crawler;
use crate::storage::Store;

/// Handle to the running background tasks.
#[derive(Debug)]
pub struct Scheduler {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    refresh_every: Duration,
    push_every: Duration,
}

impl Scheduler {
    /// Spawn the refresh and push loops on the current runtime.
    pub fn start(
        refresh_every: Duration,
        push_every: Duration,
        crawler: Crawler,
        store: Arc<Store>,
    ) -> Self {
        let token = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(refresh_loop(refresh_every, crawler.clone(), token.clone())),
            tokio::spawn(push_loop(push_every, crawler, store, token.clone())),
        ];
        log::info!(
            "Scheduler started: refresh every {:?}, push every {:?}",
            refresh_every,
            push_every
        );

        Self {
            token,
            tasks,
            refresh_every,
            push_every,
        }
    }

    pub fn refresh_every(&self) -> Duration {
        self.refresh_every
    }

    pub fn push_every(&self) -> Duration {
        self.push_every
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.tasks.iter().any(|t| !t.is_finished())
    }

    /// Cancel both loops and wait for them to exit.
    ///
    /// A sweep in progress is abandoned; a push in progress completes.
    pub async fn stop(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Scheduler task ended abnormally: {}", e);
            }
        }
        log::info!("Scheduler stopped");
    }
}

fn ticker(period: Duration) -> time::Interval {
    let period = if period.is_zero() {
        Duration::from_secs(1)
    } else {
        period
    };
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn refresh_loop(period: Duration, crawler: Crawler, token: CancellationToken) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Refresh sweep interrupted by shutdown");
                break;
            }
            _ = crawler.refresh_all() => {}
        }
    }
}

async fn push_loop(
    period: Duration,
    crawler: Crawler,
    store: Arc<Store>,
    token: CancellationToken,
) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let started = Instant::now();
        match store.push(crawler.registry(), crawler.remotes()).await {
            Ok(()) => log::info!("Pushed registry to storage in {:.2?}", started.elapsed()),
            Err(e) => log::error!("Periodic push failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Config, CrawlerConfig, StatusMap};
    use crate::registry::{Registry, RemoteRegistries};
    use crate::services::Fetcher;
    use crate::storage::BackendKind;
    use crate::utils::testing::MockServer;
    use tempfile::TempDir;

    fn crawler() -> Crawler {
        let fetcher = Fetcher::new(&CrawlerConfig::default()).unwrap();
        Crawler::new(
            Arc::new(Registry::new(fetcher)),
            Arc::new(RemoteRegistries::new()),
            &Config::default(),
        )
    }

    #[tokio::test]
    async fn test_stop_before_first_tick_does_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.db");
        let store = Arc::new(Store::new());
        store.open(BackendKind::Kv, &path).await.unwrap();

        let scheduler = Scheduler::start(
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            crawler(),
            Arc::clone(&store),
        );
        assert!(scheduler.is_running());
        scheduler.stop().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_periodic_refresh_and_push() {
        let server = MockServer::start().await;
        let url = server.feed("/twtxt.txt", "2024-01-01T00:00:00Z\thello\n");
        let crawler = crawler();
        crawler
            .registry()
            .add_user("alice", &url, None, StatusMap::new())
            .unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.db");
        let store = Arc::new(Store::new());
        store.open(BackendKind::Kv, &path).await.unwrap();

        let scheduler = Scheduler::start(
            Duration::from_millis(20),
            Duration::from_millis(20),
            crawler.clone(),
            Arc::clone(&store),
        );
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop().await;

        assert_eq!(crawler.registry().get(&url).unwrap().status.len(), 1);
        assert!(path.exists());
    }
}
