//! Background work on the registry.
//!
//! - `crawl`: refresh sweeps, peer-registry crawls and submissions
//! - `scheduler`: periodic refresh and persistence tasks

pub mod crawl;
pub mod scheduler;

pub use crawl::{Crawler, RefreshSummary, Submission};
pub use scheduler::Scheduler;
