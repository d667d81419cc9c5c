//! medorg — queue-backed media ingestion pipeline.
//!
//! Watches an inbox for finished video files, enriches each with catalog
//! metadata, renames it into an actress-folder library layout, and registers
//! it with a downstream media server. A PostgreSQL work queue decouples the
//! filesystem stage from the media-server stage.

pub mod catalog;
pub mod config;
pub mod emby;
pub mod error;
pub mod extract;
pub mod queue;
pub mod renamer;
pub mod watcher;
pub mod worker;

pub use catalog::{CatalogClient, CatalogRecord};
pub use config::Config;
pub use emby::EmbyClient;
pub use error::{MedorgError, Result};
pub use queue::{ItemStatus, QueueItem, QueueStore};
pub use worker::WorkerSet;
