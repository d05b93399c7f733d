//! Configuration management for Darkroom.
//!
//! Configuration is loaded from the platform config directory with sensible
//! defaults. Every section implements `Default`, so a missing file or a
//! partial file both produce a complete configuration.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for Darkroom.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local object/record store settings
    pub storage: StorageConfig,

    /// Cache key derivation settings
    pub cache: CacheConfig,

    /// Task queue settings
    pub queue: QueueConfig,

    /// Worker retry and lifecycle settings
    pub worker: WorkerConfig,

    /// Point-of-use retry for transient store errors
    pub store_retry: RetryConfig,

    /// Pipeline executor settings
    pub pipeline: PipelineConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.darkroom.darkroom/config.toml
    /// - Linux: ~/.config/darkroom/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\darkroom\config\config.toml
    ///
    /// Falls back to ~/.darkroom/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "darkroom", "darkroom")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".darkroom").join("config.toml")
            })
    }

    /// Get the resolved storage root (with ~ expansion).
    pub fn storage_root(&self) -> PathBuf {
        let path_str = self.storage.root.to_string_lossy();
        let expanded = shellexpand::tilde(&path_str);
        PathBuf::from(expanded.into_owned())
    }

    /// Get the resolved watermark asset path (with ~ expansion).
    pub fn watermark_path(&self) -> PathBuf {
        let path_str = self.pipeline.watermark_path.to_string_lossy();
        let expanded = shellexpand::tilde(&path_str);
        PathBuf::from(expanded.into_owned())
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}
