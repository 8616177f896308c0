// src/models/mod.rs

//! Domain models for the registry.
//!
//! This module contains the plain data structures shared by the index,
//! the crawler and the storage backends.

mod config;
pub mod status;
mod user;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, DatabaseConfig, InstanceConfig, LoggingConfig, ScheduleConfig,
};
pub use status::StatusMap;
pub use user::{RegistrySnapshot, User};
