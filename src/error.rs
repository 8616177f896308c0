// src/error.rs

//! Unified error handling for the registry.

use std::fmt;

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// URL is missing the http:// or https:// scheme
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Caller supplied bad input (empty nickname, missing key, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// A user with this URL is already registered
    #[error("user {0} already exists")]
    UserExists(String),

    /// No user is registered under this URL
    #[error("user {0} doesn't exist")]
    UserNotFound(String),

    /// Attempt to add this registry to its own peer list
    #[error("can't submit this registry to itself: {0}")]
    SelfSubmission(String),

    /// Conditional fetch reported no change
    #[error("no new statuses available for {0}")]
    NoNewStatuses(String),

    /// Expected a peer-registry dump but got a single feed, or the reverse
    #[error("{url}: {message}")]
    NotARegistry { url: String, message: String },

    /// Remote answered with something other than text/plain
    #[error("received non-text/plain response body ({content_type}) from {url}")]
    WrongContentType { url: String, content_type: String },

    /// Remote answered with a status other than 200
    #[error("didn't get 200 from remote server, received {status}: {url}")]
    BadStatus { url: String, status: u16 },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Fetched feed had no content
    #[error("no data to parse in feed")]
    EmptyFeed,

    /// A feed line did not have the expected shape
    #[error("improperly formatted data on line {line}: {reason}")]
    MalformedFeed { line: usize, reason: String },

    /// Aggregate of recoverable per-line parse failures
    #[error("{count} line(s) skipped while parsing: {summary}")]
    SoftParse { count: usize, summary: String },

    /// Query term required but empty
    #[error("cannot query for empty {0}")]
    EmptyQuery(&'static str),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// SQLite backend failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Persistence layer error
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Background task failed to complete
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl(url.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a malformed-feed error for a 1-based line number.
    pub fn malformed(line: usize, reason: impl fmt::Display) -> Self {
        Self::MalformedFeed {
            line,
            reason: reason.to_string(),
        }
    }

    /// Create a registry/feed mismatch error.
    pub fn not_a_registry(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotARegistry {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Errors caused by the caller's input rather than the registry or network.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::Validation(_)
                | Self::UserExists(_)
                | Self::SelfSubmission(_)
                | Self::NotARegistry { .. }
                | Self::EmptyFeed
                | Self::MalformedFeed { .. }
                | Self::EmptyQuery(_)
        )
    }

    /// True when a conditional fetch found nothing new.
    pub fn is_no_new_statuses(&self) -> bool {
        matches!(self, Self::NoNewStatuses(_))
    }

    /// Network-side failures that a later sweep may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::WrongContentType { .. } | Self::BadStatus { .. }
        )
    }
}
