//! Bulk song downloads across many music sources.
//!
//! Sources plug in through [`api::Provider`]. [`downloader::manager::DownloadManager`]
//! runs downloads with bounded concurrency, [`downloader::writer::DiskWriter`] lays files
//! out on disk, and [`search::fallback::FallbackResolver`] finds the same song elsewhere
//! when a source cannot supply audio.

pub mod api;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod search;
pub mod utils;

pub use api::{Provider, ProviderRegistry, Song};
pub use config::AppConfig;
pub use downloader::manager::DownloadManager;
pub use errors::{AppError, Result};
