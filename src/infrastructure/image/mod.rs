//! Image loading infrastructure.
//!
//! This module provides:
//! - Memory caching with byte-bounded LRU eviction
//! - Disk caching for persistence
//! - Deduplicated fetch units on two worker pools
//! - Request reconciliation with progressive promotion

pub mod decoder;
pub mod dispatcher;
pub mod disk_cache;
pub mod fetch_unit;
pub mod http_transport;
pub mod loader;
pub mod memory_cache;
pub mod request;
pub mod result_sink;
pub mod work_queue;

pub use decoder::RasterDecoder;
pub use dispatcher::{Admission, DispatchError, Dispatcher, PoolKind, PoolSizes};
pub use disk_cache::DiskImageCache;
pub use fetch_unit::{Binding, FetchUnit, Pipeline};
pub use http_transport::HttpTransport;
pub use loader::{ImageLoader, LoadReport, LoaderError, LoaderStats};
pub use memory_cache::{CacheStats, LruMemoryCache};
pub use request::LoadRequest;
pub use result_sink::ResultSink;
pub use work_queue::WorkQueue;
