// Configuration management for tunelink
// Loads settings from TOML, falling back to defaults for anything missing

use crate::playback::FallbackPolicy;
use anyhow::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Replaces `api.base_url` when set
pub const API_URL_ENV: &str = "TUNELINK_API_URL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub downloads: DownloadsConfig,
    pub playback: PlaybackConfig,
    pub favorites: FavoritesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub poll_interval_ms: u64,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub volume: f32,
    pub rate: f32,
    pub autoplay: bool,
    pub autoplay_fallback: FallbackPolicy,
    /// Used by the headless source for songs without a duration label
    pub headless_track_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FavoritesConfig {
    pub database_path: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1500,
            output_dir: dirs::audio_dir()
                .or_else(dirs::download_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tunelink"),
        }
    }
}

impl DownloadsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume: 0.8,
            rate: 1.0,
            autoplay: true,
            autoplay_fallback: FallbackPolicy::FirstCandidate,
            headless_track_secs: 180.0,
        }
    }
}

impl Default for FavoritesConfig {
    fn default() -> Self {
        Self {
            database_path: app_dir().join("favorites.db"),
        }
    }
}

fn app_dir() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("tunelink")
}

impl Config {
    /// Loads the user's config, writing defaults on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        config.apply_env(std::env::var(API_URL_ENV).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    fn apply_env(&mut self, api_url: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            debug!("API base url overridden by {}", API_URL_ENV);
            self.api.base_url = url;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("tunelink");

        Ok(config_dir.join("config.toml"))
    }
}
