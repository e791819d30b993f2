//! Nightwatch - sensor-side file inspection pipeline.
//!
//! Consumes fileinfo events from an upstream network IDS, filters extracted
//! files by magic, hashes and analyzes them, persists deduplicated verdicts,
//! publishes them to a message bus and optionally mirrors suspicious samples
//! to an object store. A janitor keeps the filestore bounded in age and
//! total size.

pub mod analyzers;
pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod filestore;
pub mod hashing;
pub mod ingest;
pub mod janitor;
pub mod magic;
pub mod models;
pub mod pipeline;
pub mod sensor;
pub mod submit;
pub mod upload;

pub use config::Config;
pub use error::{AppError, Result};
