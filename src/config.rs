use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use dirs;
use crate::errors::{AppError, Result};
use crate::search::fallback::DEFAULT_FALLBACK_ORDER;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Base directory for downloaded songs. Unset means local persistence is off.
    pub music_dir: Option<PathBuf>,
    pub max_concurrent_downloads: usize,
    pub download_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub proxy: Option<String>,
    pub use_system_proxy: bool,
    pub user_agent: String,
    pub fallback_order: Vec<String>,
    pub enable_lyrics: bool,
    pub enable_cover_art: bool,
}

/// What the status endpoint reports about local persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceStatus {
    pub nas_enabled: bool,
    pub music_dir: Option<PathBuf>,
    pub concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            music_dir: None,
            max_concurrent_downloads: 3,
            download_timeout_secs: 30 * 60,
            connect_timeout_secs: 15,
            proxy: None,
            use_system_proxy: true,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            fallback_order: DEFAULT_FALLBACK_ORDER.iter().map(|s| s.to_string()).collect(),
            enable_lyrics: true,
            enable_cover_art: true,
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the user config file if present, then `MUSIC_DL_*` variables.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::get_config_path().ok())
    }

    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            log::debug!("Reading configuration from {:?}", path);
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MUSIC_DL")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("fallback_order"),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(AppError::Validation(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if self.download_timeout_secs == 0 {
            return Err(AppError::Validation(
                "download_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The download boundary refuses to run without a music directory.
    pub fn require_music_dir(&self) -> Result<&Path> {
        match &self.music_dir {
            Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.as_path()),
            _ => Err(AppError::Validation(
                "music_dir is not configured".to_string(),
            )),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            nas_enabled: self.require_music_dir().is_ok(),
            music_dir: self.music_dir.clone(),
            concurrency: self.max_concurrent_downloads,
        }
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::NotFound("Could not find config directory".to_string()))?;

        Ok(config_dir.join("music-dl").join("config.toml"))
    }
}
