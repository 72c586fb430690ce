use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use crate::api::coerce::{any_to_string, any_to_u64};
use crate::api::{ensure_source, Capabilities, Provider, Song};
use crate::errors::{AppError, Result};
use crate::search::normalize;

#[derive(Debug, Deserialize)]
struct RawManifest {
    source: String,
    #[serde(default)]
    tracks: Vec<RawTrack>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    album: String,
    #[serde(default)]
    duration: Value,
    #[serde(default)]
    size: Value,
    #[serde(default)]
    bitrate: Value,
    #[serde(default)]
    cover: String,
    #[serde(default)]
    ext: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    lyrics: String,
}

#[derive(Debug, Clone)]
struct Entry {
    song: Song,
    url: String,
    lyrics: String,
}

/// A source backed by a local JSON catalog of tracks and their audio URLs.
#[derive(Debug, Clone)]
pub struct ManifestProvider {
    source: String,
    entries: Vec<Entry>,
    by_id: HashMap<String, usize>,
}

impl ManifestProvider {
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(json)?;
        if raw.source.trim().is_empty() {
            return Err(AppError::Validation("manifest source must not be empty".to_string()));
        }

        let mut entries = Vec::with_capacity(raw.tracks.len());
        let mut by_id = HashMap::new();
        for (index, track) in raw.tracks.into_iter().enumerate() {
            let mut id = any_to_string(&track.id);
            if id.is_empty() {
                id = (index + 1).to_string();
            }
            let song = Song {
                source: raw.source.clone(),
                id: id.clone(),
                name: track.name,
                artist: track.artist,
                album: track.album,
                duration: any_to_u64(&track.duration).unwrap_or(0),
                size: any_to_u64(&track.size).unwrap_or(0),
                bitrate: any_to_u64(&track.bitrate)
                    .and_then(|b| u32::try_from(b).ok())
                    .unwrap_or(0),
                cover: track.cover,
                ext: track.ext,
            };
            if by_id.insert(id.clone(), entries.len()).is_some() {
                log::warn!(
                    "Duplicate track id {} in {} manifest, later entry wins",
                    id,
                    raw.source
                );
            }
            entries.push(Entry {
                song,
                url: track.url,
                lyrics: track.lyrics,
            });
        }

        Ok(Self {
            source: raw.source,
            entries,
            by_id,
        })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::io(format!("read manifest {:?}", path), e))?;
        let provider = Self::from_json(&json)?;
        log::info!(
            "Loaded {} tracks for source {} from {:?}",
            provider.entries.len(),
            provider.source,
            path
        );
        Ok(provider)
    }

    pub fn songs(&self) -> Vec<Song> {
        self.entries.iter().map(|e| e.song.clone()).collect()
    }

    fn entry(&self, song: &Song) -> Option<&Entry> {
        self.by_id.get(&song.id).map(|&i| &self.entries[i])
    }
}

#[async_trait::async_trait]
impl Provider for ManifestProvider {
    fn name(&self) -> &str {
        &self.source
    }

    async fn search(&self, keyword: &str) -> Result<Vec<Song>> {
        let needle = normalize(keyword);
        let tokens: Vec<&str> = needle.split(' ').filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .entries
            .iter()
            .filter(|entry| {
                let haystack = normalize(&format!("{} {}", entry.song.name, entry.song.artist));
                tokens.iter().all(|t| haystack.contains(t))
            })
            .map(|entry| entry.song.clone())
            .collect())
    }

    async fn download_url(&self, song: &Song) -> Result<String> {
        match self.entry(song) {
            Some(entry) if !entry.url.is_empty() => Ok(entry.url.clone()),
            _ => Err(AppError::Provider("download url not found".to_string())),
        }
    }

    async fn lyrics(&self, song: &Song) -> Result<String> {
        ensure_source(song, &self.source)?;
        Ok(self.entry(song).map(|e| e.lyrics.clone()).unwrap_or_default())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            download: true,
            lyrics: self.entries.iter().any(|e| !e.lyrics.is_empty()),
        }
    }
}
