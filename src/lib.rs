// src/lib.rs

//! Federated twtxt registry library

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod services;
pub mod storage;
pub mod utils;
