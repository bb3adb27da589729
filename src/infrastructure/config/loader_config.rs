//! Image loader configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::entities::Level;
use crate::infrastructure::image::disk_cache::{CONSTRAINED_MAX_CACHE_SIZE, DEFAULT_MAX_CACHE_SIZE};
use crate::infrastructure::image::http_transport::DEFAULT_TIMEOUT_SECS;
use crate::infrastructure::image::memory_cache::DEFAULT_MEMORY_PERCENT;

/// Tunables for [`crate::infrastructure::image::ImageLoader`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Memory cache sizing.
    #[serde(default)]
    pub memory_cache: MemoryCacheConfig,

    /// Disk cache location and sizing.
    #[serde(default)]
    pub disk_cache: DiskCacheConfig,

    /// Worker pool sizing.
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Levels whose units reconciliation may cancel.
    #[serde(default = "default_cancellable_levels")]
    pub cancellable_levels: Vec<Level>,

    /// Results at or below this level are cached in memory even when
    /// nobody is waiting for them.
    #[serde(default = "default_eager_retention_threshold")]
    pub eager_retention_threshold: Level,

    /// Decode bound in pixels when a request does not set one.
    #[serde(default = "default_target_size")]
    pub default_target_size: u32,

    /// Decoder behavior.
    #[serde(default)]
    pub decode: DecodeConfig,

    /// Network behavior.
    #[serde(default)]
    pub network: NetworkConfig,
}

impl LoaderConfig {
    /// Returns true if units at `level` run on the cancellable pool.
    #[must_use]
    pub fn is_cancellable(&self, level: Level) -> bool {
        self.cancellable_levels.contains(&level)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            memory_cache: MemoryCacheConfig::default(),
            disk_cache: DiskCacheConfig::default(),
            workers: WorkerConfig::default(),
            cancellable_levels: default_cancellable_levels(),
            eager_retention_threshold: default_eager_retention_threshold(),
            default_target_size: default_target_size(),
            decode: DecodeConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

/// Memory cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Share of available memory, in percent, capped at 80.
    #[serde(default = "default_memory_percent")]
    pub percent: u8,

    /// Fixed budget in bytes; overrides `percent`.
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            percent: default_memory_percent(),
            max_bytes: None,
        }
    }
}

/// Disk cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Directory name under the platform cache directory.
    #[serde(default = "default_disk_dir_name")]
    pub dir_name: String,

    /// Explicit cache directory; overrides `dir_name`.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Byte budget.
    #[serde(default = "default_disk_max_bytes")]
    pub max_bytes: u64,

    /// Byte budget used when falling back to the temp directory.
    #[serde(default = "default_disk_constrained_max_bytes")]
    pub constrained_max_bytes: u64,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            dir_name: default_disk_dir_name(),
            directory: None,
            max_bytes: default_disk_max_bytes(),
            constrained_max_bytes: default_disk_constrained_max_bytes(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Threads running non-cancellable work.
    #[serde(default = "default_pool_size")]
    pub standard: usize,

    /// Threads running cancellable work.
    #[serde(default = "default_pool_size")]
    pub cancellable: usize,

    /// Units each pool may hold before submission blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            standard: default_pool_size(),
            cancellable: default_pool_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Decoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Total decode attempts when memory runs out.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Allocation cap per decode in bytes.
    #[serde(default)]
    pub max_alloc_bytes: Option<u64>,
}

impl DecodeConfig {
    /// Pause between attempts.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_alloc_bytes: None,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_cancellable_levels() -> Vec<Level> {
    vec![Level::new(2)]
}

const fn default_eager_retention_threshold() -> Level {
    Level::new(1)
}

const fn default_target_size() -> u32 {
    1024
}

const fn default_memory_percent() -> u8 {
    DEFAULT_MEMORY_PERCENT
}

fn default_disk_dir_name() -> String {
    "image_cache".to_string()
}

const fn default_disk_max_bytes() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

const fn default_disk_constrained_max_bytes() -> u64 {
    CONSTRAINED_MAX_CACHE_SIZE
}

const fn default_pool_size() -> usize {
    5
}

const fn default_queue_capacity() -> usize {
    10_000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    50
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
