//! Domain layer with core entities and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{DecodedImage, Level, LevelMap, ResourceId};
pub use errors::FetchError;
pub use ports::{Consumer, ConsumerHandle, Decoder, DiskCache, LoadListener, MemoryCache, Transport};
