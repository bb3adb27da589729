//! Port definitions for image caching.

use std::io::Read;

use bytes::Bytes;

use crate::domain::entities::{DecodedImage, ResourceId};

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// I/O error during cache operation.
    #[error("IO error: {0}")]
    IoError(String),
    /// Persistent store failed its integrity check.
    #[error("Cache store corrupt: {0}")]
    Corrupt(String),
    /// The cache was closed.
    #[error("Cache is closed")]
    Closed,
}

/// Bounded cache of decoded images.
/// Implementations must be thread-safe.
pub trait MemoryCache: Send + Sync {
    /// Returns the image for `id`, promoting it in recency order.
    /// A released image behaves as a miss.
    fn get(&self, id: &ResourceId) -> Option<DecodedImage>;

    /// Stores an image unless `id` is already present.
    /// Returns true if the image was inserted.
    fn put(&self, id: ResourceId, image: DecodedImage) -> bool;

    /// Removes an image. Returns true if it was present.
    fn remove(&self, id: &ResourceId) -> bool;

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the cache.
    fn clear(&self);
}

/// Persistent, bounded store of raw image bytes.
/// Implementations must be thread-safe and publish writes atomically.
pub trait DiskCache: Send + Sync {
    /// Returns the complete stored content for `id`.
    fn get(&self, id: &ResourceId) -> Option<Bytes>;

    /// Stores the content read from `content`, replacing any previous value.
    ///
    /// # Errors
    /// Returns error if the content cannot be written or the cache is closed.
    fn put(&self, id: &ResourceId, content: &mut dyn Read) -> CacheResult<()>;

    /// Stores a byte slice.
    ///
    /// # Errors
    /// Returns error if the content cannot be written or the cache is closed.
    fn put_bytes(&self, id: &ResourceId, bytes: &[u8]) -> CacheResult<()> {
        let mut reader = bytes;
        self.put(id, &mut reader)
    }

    /// Removes an entry.
    ///
    /// # Errors
    /// Returns error if the entry exists but cannot be deleted.
    fn remove(&self, id: &ResourceId) -> CacheResult<bool>;

    /// Bytes currently stored.
    fn size(&self) -> u64;

    /// Byte budget.
    fn max_size(&self) -> u64;

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes every entry.
    ///
    /// # Errors
    /// Returns error if the store cannot be read.
    fn clear(&self) -> CacheResult<()>;

    /// Stops accepting reads and writes.
    ///
    /// # Errors
    /// Returns error if pending state cannot be flushed.
    fn close(&self) -> CacheResult<()>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Disk cache kept in a hash map.
    #[derive(Default)]
    pub struct InMemoryDiskCache {
        entries: Mutex<HashMap<ResourceId, Bytes>>,
    }

    impl InMemoryDiskCache {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Returns true if `id` is stored.
        pub fn contains(&self, id: &ResourceId) -> bool {
            self.entries.lock().contains_key(id)
        }
    }

    impl DiskCache for InMemoryDiskCache {
        fn get(&self, id: &ResourceId) -> Option<Bytes> {
            self.entries.lock().get(id).cloned()
        }

        fn put(&self, id: &ResourceId, content: &mut dyn Read) -> CacheResult<()> {
            let mut buf = Vec::new();
            content
                .read_to_end(&mut buf)
                .map_err(|e| CacheError::IoError(e.to_string()))?;
            self.entries.lock().insert(id.clone(), Bytes::from(buf));
            Ok(())
        }

        fn remove(&self, id: &ResourceId) -> CacheResult<bool> {
            Ok(self.entries.lock().remove(id).is_some())
        }

        fn size(&self) -> u64 {
            self.entries.lock().values().map(|b| b.len() as u64).sum()
        }

        fn max_size(&self) -> u64 {
            u64::MAX
        }

        fn len(&self) -> usize {
            self.entries.lock().len()
        }

        fn clear(&self) -> CacheResult<()> {
            self.entries.lock().clear();
            Ok(())
        }

        fn close(&self) -> CacheResult<()> {
            Ok(())
        }
    }
}
