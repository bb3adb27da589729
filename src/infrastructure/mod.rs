//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (caching, fetching, decoding, scheduling).
pub mod image;

pub use config::{AppConfig, CliArgs, ConfigError, LoaderConfig, LogLevel};
pub use image::{
    CacheStats, DiskImageCache, HttpTransport, ImageLoader, LoadReport, LoadRequest, LoaderError,
    LruMemoryCache, RasterDecoder,
};
