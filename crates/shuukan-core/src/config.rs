use std::time::Duration;

#[cfg(feature = "fs-store")]
use std::path::PathBuf;

#[cfg(feature = "fs-store")]
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ShuukanError;

const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub watcher: WatcherConfig,
    pub progress: ProgressConfig,
    pub site: SiteConfig,
}

/// Timing of the mutation watcher and its retry ladders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
    pub safety_ladder_ms: Vec<u64>,
    pub rescan_interval_secs: u64,
    pub navigation_rescan_ms: Vec<u64>,
    pub countdown_tick_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    pub timeout_ms: u64,
}

/// Host site strings the locator and renderer depend on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub section_title: String,
    pub replacement_title: String,
    pub base_url: String,
    pub placeholder_cover: String,
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn safety_ladder(&self) -> Vec<Duration> {
        self.safety_ladder_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    pub fn navigation_rescans(&self) -> Vec<Duration> {
        self.navigation_rescan_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs.max(1))
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_secs(self.countdown_tick_secs.max(1))
    }
}

impl ProgressConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    /// Parse a config document.
    pub fn from_toml(content: &str) -> Result<Self, ShuukanError> {
        toml::from_str(content).map_err(|e| ShuukanError::Config(e.to_string()))
    }

    /// Load config: user file if it exists, otherwise the built-in defaults.
    #[cfg(feature = "fs-store")]
    pub fn load() -> Result<Self, ShuukanError> {
        let user_path = Self::config_path();
        if user_path.exists() {
            let user_str = std::fs::read_to_string(&user_path)?;
            Self::from_toml(&user_str)
        } else {
            Self::from_toml(DEFAULT_CONFIG)
        }
    }

    /// Save current config to the user config file.
    #[cfg(feature = "fs-store")]
    pub fn save(&self) -> Result<(), ShuukanError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ShuukanError::Config(e.to_string()))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Path to user config file (XDG on Linux, AppData on Windows).
    #[cfg(feature = "fs-store")]
    pub fn config_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Path to the persisted user preferences.
    #[cfg(feature = "fs-store")]
    pub fn preferences_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.data_dir().join("preferences.toml"))
            .unwrap_or_else(|| PathBuf::from("preferences.toml"))
    }

    #[cfg(feature = "fs-store")]
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "shuukan")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config is valid TOML")
    }
}
