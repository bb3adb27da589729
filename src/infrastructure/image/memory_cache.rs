//! In-memory LRU image cache bounded by bytes.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::domain::entities::{DecodedImage, ResourceId};
use crate::domain::ports::MemoryCache;

/// Default share of available memory given to the cache.
pub const DEFAULT_MEMORY_PERCENT: u8 = 20;

/// Upper bound on the configurable share.
pub const MAX_MEMORY_PERCENT: u8 = 80;

/// Budget used when available memory cannot be estimated.
pub const FALLBACK_CAPACITY_BYTES: u64 = 4 * 1024 * 1024;

struct Entries {
    lru: LruCache<ResourceId, DecodedImage>,
    bytes: u64,
}

/// LRU cache for decoded images, evicting by pixel footprint.
/// Thread-safe; every operation takes one short lock.
pub struct LruMemoryCache {
    entries: Mutex<Entries>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LruMemoryCache {
    /// Creates a cache with a byte budget.
    #[must_use]
    pub fn with_capacity_bytes(capacity: u64) -> Self {
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::unbounded(),
                bytes: 0,
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache sized as `percent` of the memory currently available.
    #[must_use]
    pub fn from_available_memory(percent: u8) -> Self {
        let available = available_memory_bytes();
        let capacity = Self::capacity_for(available, percent);
        debug!(
            available = available,
            percent = percent,
            capacity = capacity,
            "Sized memory image cache"
        );
        Self::with_capacity_bytes(capacity)
    }

    /// Computes the byte budget for a memory estimate and a percentage.
    /// The percentage is clamped to [`MAX_MEMORY_PERCENT`].
    #[must_use]
    pub fn capacity_for(available: u64, percent: u8) -> u64 {
        let percent = u64::from(percent.min(MAX_MEMORY_PERCENT));
        let capacity = available / 100 * percent;
        if capacity == 0 {
            FALLBACK_CAPACITY_BYTES
        } else {
            capacity
        }
    }

    /// Byte budget.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently held.
    #[must_use]
    pub fn current_bytes(&self) -> u64 {
        self.entries.lock().bytes
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let entries = self.entries.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: entries.lru.len(),
            bytes: entries.bytes,
            capacity: self.capacity,
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    #[must_use]
    pub fn peek(&self, id: &ResourceId) -> Option<DecodedImage> {
        self.entries.lock().lru.peek(id).cloned()
    }

    fn trim(&self, entries: &mut Entries) {
        while entries.bytes > self.capacity {
            let Some((id, image)) = entries.lru.pop_lru() else {
                break;
            };
            entries.bytes = entries.bytes.saturating_sub(image.byte_size());
            trace!(id = %id, bytes = image.byte_size(), "Evicted image from memory cache");
        }
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Bytes currently held.
    pub bytes: u64,
    /// Byte budget.
    pub capacity: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {}/{} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.bytes, self.capacity, self.hit_rate, self.hits, self.misses
        )
    }
}

impl MemoryCache for LruMemoryCache {
    fn get(&self, id: &ResourceId) -> Option<DecodedImage> {
        let mut entries = self.entries.lock();
        let found = entries.lru.get(id).cloned();
        match found {
            Some(image) if image.is_valid() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(id = %id, "Memory cache hit");
                Some(image)
            }
            Some(image) => {
                entries.lru.pop(id);
                entries.bytes = entries.bytes.saturating_sub(image.byte_size());
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(id = %id, "Dropped released image from memory cache");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(id = %id, "Memory cache miss");
                None
            }
        }
    }

    fn put(&self, id: ResourceId, image: DecodedImage) -> bool {
        let mut entries = self.entries.lock();
        if entries.lru.contains(&id) {
            trace!(id = %id, "Memory cache already holds image, keeping first");
            return false;
        }
        debug!(id = %id, bytes = image.byte_size(), "Storing image in memory cache");
        entries.bytes += image.byte_size();
        entries.lru.put(id, image);
        self.trim(&mut entries);
        true
    }

    fn remove(&self, id: &ResourceId) -> bool {
        let mut entries = self.entries.lock();
        if let Some(image) = entries.lru.pop(id) {
            entries.bytes = entries.bytes.saturating_sub(image.byte_size());
            debug!(id = %id, "Removed image from memory cache");
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.lru.clear();
        entries.bytes = 0;
        debug!("Cleared memory image cache");
    }
}

fn available_memory_bytes() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    system.available_memory()
}
