// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, LAST_MODIFIED};

use crate::error::Result;
use crate::models::CrawlerConfig;

/// Create a configured asynchronous HTTP client.
///
/// Every request made through it is bounded by `timeout_secs`, so one
/// unreachable feed cannot stall a refresh sweep.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// True if any Content-Type header value mentions text/plain.
pub fn is_text_plain(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONTENT_TYPE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/plain"))
}

/// Joined Content-Type values, for error messages.
pub fn content_type(headers: &HeaderMap) -> String {
    headers
        .get_all(CONTENT_TYPE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ")
}

/// First non-empty Last-Modified header value.
pub fn last_modified(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LAST_MODIFIED)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}
