mod consumer_port;
mod decoder_port;
mod image_cache_port;
mod transport_port;

pub use consumer_port::{Consumer, ConsumerHandle, LoadListener};
pub use decoder_port::Decoder;
pub use image_cache_port::{CacheError, CacheResult, DiskCache, MemoryCache};
pub use transport_port::Transport;
