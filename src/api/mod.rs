pub mod coerce;
pub mod manifest;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use crate::errors::{AppError, Result};

/// One recording as reported by a source. IDs are only meaningful within `source`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub source: String,
    pub id: String,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    /// Seconds.
    #[serde(default)]
    pub duration: u64,
    /// Bytes.
    #[serde(default)]
    pub size: u64,
    /// kbps.
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub ext: String,
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} [{}]", self.artist, self.name, self.source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub search: bool,
    pub download: bool,
    pub lyrics: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            search: true,
            download: true,
            lyrics: true,
        }
    }
}

/// The per-source function bundle the download core depends on.
///
/// `lyrics` must fail with [`AppError::SourceMismatch`] when handed a song from another
/// source, and return an empty string on platforms without lyrics.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, keyword: &str) -> Result<Vec<Song>>;

    async fn download_url(&self, song: &Song) -> Result<String>;

    async fn lyrics(&self, song: &Song) -> Result<String>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

pub fn ensure_source(song: &Song, provider: &str) -> Result<()> {
    if song.source != provider {
        return Err(AppError::SourceMismatch {
            expected: provider.to_string(),
            actual: song.source.clone(),
        });
    }
    Ok(())
}

/// Explicit set of configured providers, keyed by source tag.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        if self.providers.insert(name.clone(), provider).is_some() {
            log::warn!("Provider {} registered twice, keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
