// src/registry/mod.rs

//! In-memory registry state.
//!
//! - `index`: users keyed by feed URL with per-user locks
//! - `remotes`: peer registries to crawl
//! - `query`: read-only lookups and pagination

mod index;
pub mod query;
mod remotes;

pub use index::{Registry, SharedUser};
pub use query::{PAGE_SIZE, reduce_to_page};
pub use remotes::RemoteRegistries;
