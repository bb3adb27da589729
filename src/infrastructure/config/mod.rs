//! Application configuration.

pub mod app_config;
pub mod args;
pub mod loader_config;
pub mod paths;

pub use app_config::{AppConfig, ConfigError, LogLevel};
pub use args::CliArgs;
pub use loader_config::{
    DecodeConfig, DiskCacheConfig, LoaderConfig, MemoryCacheConfig, NetworkConfig, WorkerConfig,
};
