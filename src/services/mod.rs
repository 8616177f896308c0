// src/services/mod.rs

//! Service layer for feed retrieval and parsing.
//!
//! - `Fetcher`: HTTP retrieval and conditional checks of remote feeds
//! - `parser`: conversion of feed text into status records and users

pub mod fetcher;
pub mod parser;

pub use fetcher::{FeedDiff, FetchedFeed, Fetcher};
pub use parser::{Parsed, SoftError, parse_registry_feed, parse_user_feed};
