//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Local storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding blobs and the record manifest
    pub root: PathBuf,

    /// Prefix for resolvable URLs (`{public_base_url}/{key}`)
    pub public_base_url: String,

    /// Largest accepted upload, in bytes
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.darkroom/storage"),
            public_base_url: "http://localhost:9000/images".to_string(),
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Cache key derivation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of hex characters of the BLAKE3 digest kept in a cache key.
    ///
    /// 12 characters is 48 bits: fine for a single deployment's cardinality
    /// but not a uniqueness guarantee. The record store's `(owner, key)`
    /// constraint is what actually prevents duplicates.
    pub key_hash_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { key_hash_len: 12 }
    }
}

/// Task queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Durable queue carrying transformation jobs
    pub name: String,

    /// Durable queue receiving permanently failed jobs
    pub dead_letter_name: String,

    /// Max unacknowledged deliveries per worker
    pub prefetch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "image-processing".to_string(),
            dead_letter_name: "image-processing.dead-letter".to_string(),
            prefetch: 1,
        }
    }
}

/// Worker retry and lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Deliveries allowed per job before it is dead-lettered
    pub max_attempts: u32,

    /// Base delay before a failed job is handed back to the broker
    pub retry_delay_ms: u64,

    /// Consumer re-establishment attempts after the delivery stream ends
    pub reconnect_attempts: u32,

    /// Base delay between reconnect attempts
    pub reconnect_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
        }
    }
}

/// Retry policy for transient store errors at the point of use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub attempts: u32,

    /// Base backoff delay in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay_ms: 200,
        }
    }
}

/// Pipeline executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Watermark asset; watermarking is skipped when it is missing
    pub watermark_path: PathBuf,

    /// Watermark width as a fraction of the image width
    pub watermark_width_ratio: f32,

    /// Watermark alpha multiplier (0-255)
    pub watermark_opacity: u8,

    /// Upper bound on a single pipeline run
    pub timeout_ms: u64,

    /// Maximum decoded width or height
    pub max_image_dimension: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watermark_path: PathBuf::from("assets/logo-watermark.png"),
            watermark_width_ratio: 0.2,
            watermark_opacity: 77,
            timeout_ms: 30_000,
            max_image_dimension: 12_000,
        }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Output format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
