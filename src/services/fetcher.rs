// src/services/fetcher.rs

//! Feed fetcher.
//!
//! Retrieves remote feeds over HTTP and tells single-user feeds apart from
//! another registry's status dump.

use reqwest::header::IF_MODIFIED_SINCE;
use reqwest::{Client, StatusCode};

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;
use crate::utils::http::{self, create_async_client};

/// Path suffixes of a registry's "all statuses" endpoint.
pub const REGISTRY_DUMP_SUFFIXES: [&str; 2] = ["/api/plain/tweets", "/api/plain/tweets/all"];

/// Whether a URL points at a peer registry's status dump.
pub fn is_registry_dump_url(url: &str) -> bool {
    let url = url.trim_end_matches('/');
    REGISTRY_DUMP_SUFFIXES
        .iter()
        .any(|suffix| url.ends_with(suffix))
}

/// Raw body of a fetched feed.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub url: String,
    pub body: Vec<u8>,
    /// True when the URL is another registry's dump rather than a user feed
    pub is_registry_dump: bool,
}

/// Outcome of a conditional HEAD request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedDiff {
    /// Remote reported new content; carries its Last-Modified header if sent
    Changed { last_modified: Option<String> },
    /// 304, or any status that gives no reason to refetch
    Unchanged,
}

/// HTTP fetcher shared by the registry and crawler.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Build a fetcher with a client configured from crawler settings.
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self::with_client(create_async_client(config)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetch a feed's body.
    ///
    /// Only http:// and https:// URLs are accepted; this is the guard
    /// against local-file and other-scheme requests.
    pub async fn fetch_feed(&self, url: &str) -> Result<FetchedFeed> {
        if !has_http_scheme(url) {
            return Err(AppError::invalid_url(url));
        }

        let response = self.client.get(url).send().await?;

        if !http::is_text_plain(response.headers()) {
            return Err(AppError::WrongContentType {
                url: url.to_string(),
                content_type: http::content_type(response.headers()),
            });
        }
        if response.status() != StatusCode::OK {
            return Err(AppError::BadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await?.to_vec();
        log::debug!("Fetched {} bytes from {}", body.len(), url);

        Ok(FetchedFeed {
            url: url.to_string(),
            body,
            is_registry_dump: is_registry_dump_url(url),
        })
    }

    /// Ask the remote whether a feed changed since `last_modified`.
    pub async fn diff_feed(&self, url: &str, last_modified: &str) -> Result<FeedDiff> {
        if !has_http_scheme(url) {
            return Err(AppError::invalid_url(url));
        }

        let mut request = self.client.head(url);
        if !last_modified.is_empty() {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }
        let response = request.send().await?;

        match response.status() {
            StatusCode::OK => Ok(FeedDiff::Changed {
                last_modified: http::last_modified(response.headers()),
            }),
            StatusCode::NOT_MODIFIED => Ok(FeedDiff::Unchanged),
            other => {
                log::debug!("HEAD {} returned {}, treating as unchanged", url, other);
                Ok(FeedDiff::Unchanged)
            }
        }
    }
}

fn has_http_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
