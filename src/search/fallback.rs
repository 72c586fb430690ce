use log::{debug, info, warn};
use std::sync::Arc;
use crate::api::{Capabilities, Provider, ProviderRegistry, Song};
use crate::errors::{AppError, Result};
use crate::search::is_same_song;

/// Sources tried for fallback, best first. Higher-bitrate catalogs lead.
pub const DEFAULT_FALLBACK_ORDER: &[&str] = &[
    "netease", "qq", "kugou", "kuwo", "migu", "qianqian", "fivesing", "jamendo", "joox",
    "bilibili", "soda",
];

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackMatch {
    pub url: String,
    pub source: String,
    pub song: Song,
}

/// Looks for the same recording on other sources when the original one has no usable URL.
#[derive(Clone)]
pub struct FallbackResolver {
    registry: ProviderRegistry,
    priority: Vec<String>,
}

impl FallbackResolver {
    pub fn new(registry: ProviderRegistry, priority: Vec<String>) -> Self {
        Self { registry, priority }
    }

    pub fn with_default_order(registry: ProviderRegistry) -> Self {
        Self::new(
            registry,
            DEFAULT_FALLBACK_ORDER.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Providers eligible for fallback, in priority order, minus `exclude_source`.
    pub fn candidates(&self, exclude_source: &str) -> Vec<Arc<dyn Provider>> {
        self.priority
            .iter()
            .filter(|name| !name.eq_ignore_ascii_case(exclude_source))
            .filter_map(|name| self.registry.get(name))
            .filter(|provider| {
                let Capabilities { search, download, .. } = provider.capabilities();
                search && download
            })
            .collect()
    }

    pub async fn resolve(&self, song: &Song, exclude_source: &str) -> Result<FallbackMatch> {
        let keyword = format!("{} {}", song.artist, song.name).trim().to_string();
        let candidates = self.candidates(exclude_source);
        info!("🔄 Fallback for {} across {} providers", song, candidates.len());

        for provider in &candidates {
            let source = provider.name();
            let results = match provider.search(&keyword).await {
                Ok(results) => results,
                Err(e) => {
                    warn!("Fallback search on {} failed: {}", source, e);
                    continue;
                }
            };

            let Some(candidate) = results.into_iter().find(|r| is_same_song(song, r)) else {
                debug!("No matching result for {} on {}", song, source);
                continue;
            };

            match provider.download_url(&candidate).await {
                Ok(url) if !url.is_empty() => {
                    info!("✅ Fallback matched {} on {}", song, source);
                    return Ok(FallbackMatch {
                        url,
                        source: source.to_string(),
                        song: candidate,
                    });
                }
                Ok(_) => warn!("Fallback {} returned an empty url for {}", source, candidate),
                Err(e) => warn!("Fallback {} could not resolve {}: {}", source, candidate, e),
            }
        }

        Err(AppError::NoFallback {
            song: format!("{} - {}", song.artist, song.name),
            tried: candidates.len(),
        })
    }
}

/// Wraps a provider so that URL resolution falls back to other sources on failure.
pub struct FallbackProvider {
    primary: Arc<dyn Provider>,
    resolver: Arc<FallbackResolver>,
}

impl FallbackProvider {
    pub fn new(primary: Arc<dyn Provider>, resolver: Arc<FallbackResolver>) -> Self {
        Self { primary, resolver }
    }
}

#[async_trait::async_trait]
impl Provider for FallbackProvider {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn search(&self, keyword: &str) -> Result<Vec<Song>> {
        self.primary.search(keyword).await
    }

    async fn download_url(&self, song: &Song) -> Result<String> {
        match self.primary.download_url(song).await {
            Ok(url) if !url.is_empty() => return Ok(url),
            Ok(_) => warn!("{} returned an empty url for {}", self.primary.name(), song),
            Err(e) => warn!("{} could not resolve {}: {}", self.primary.name(), song, e),
        }
        let found = self.resolver.resolve(song, self.primary.name()).await?;
        Ok(found.url)
    }

    async fn lyrics(&self, song: &Song) -> Result<String> {
        self.primary.lyrics(song).await
    }

    fn capabilities(&self) -> Capabilities {
        self.primary.capabilities()
    }
}
