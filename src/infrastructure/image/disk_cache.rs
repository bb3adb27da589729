//! Disk-based image cache for persistence across sessions.
//!
//! Every entry lives in `<sha256(id)>.img`. Writes go to a temporary file in
//! the same directory and are published with an atomic rename, so readers
//! observe either the previous complete value or the new one. A version
//! marker guards the directory layout; a missing or foreign marker marks the
//! store as corrupt and it is wiped and reopened empty.

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::domain::entities::ResourceId;
use crate::domain::ports::{CacheError, CacheResult, DiskCache};
use crate::infrastructure::config::paths;

/// Maximum disk cache size in bytes (20 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 20 * 1024 * 1024;

/// Budget used when only the temp directory is writable (2 MB).
pub const CONSTRAINED_MAX_CACHE_SIZE: u64 = 2 * 1024 * 1024;

const ENTRY_EXTENSION: &str = "img";
const TEMP_SUFFIX: &str = ".tmp";
const MARKER_FILE: &str = "CACHE_VERSION";
const MARKER_CONTENT: &str = "imgtier-disk-cache 1\n";

struct DiskIndex {
    entries: LruCache<String, u64>,
    size: u64,
}

/// Disk-based cache that persists raw image bytes.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    index: Mutex<DiskIndex>,
    closed: AtomicBool,
}

impl DiskImageCache {
    /// Opens (or creates) a cache in `cache_dir`.
    ///
    /// Leftover temporary files from an unclean shutdown are removed. A
    /// corrupt store is reset to empty instead of failing.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or reset.
    pub fn open(cache_dir: PathBuf, max_size: u64) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;

        let found = match verify_marker(&cache_dir) {
            Ok(()) => scan_entries(&cache_dir)?,
            Err(e) => {
                warn!(dir = %cache_dir.display(), error = %e, "Disk cache corrupt, resetting");
                reset_dir(&cache_dir)?;
                Vec::new()
            }
        };

        let mut index = DiskIndex {
            entries: LruCache::unbounded(),
            size: 0,
        };
        for (key, size) in found {
            index.size += size;
            index.entries.put(key, size);
        }

        let cache = Self {
            cache_dir,
            max_size,
            index: Mutex::new(index),
            closed: AtomicBool::new(false),
        };

        {
            let mut index = cache.index.lock();
            debug!(
                dir = %cache.cache_dir.display(),
                entries = index.entries.len(),
                size = index.size,
                max_size = max_size,
                "Opened disk cache"
            );
            cache.trim(&mut index);
        }

        Ok(cache)
    }

    /// Opens `dir_name` under the platform cache directory, falling back to
    /// the temp directory with `constrained_max_size` when that fails.
    ///
    /// # Errors
    /// Returns error if neither location can be opened.
    pub fn open_default(
        dir_name: &str,
        max_size: u64,
        constrained_max_size: u64,
    ) -> CacheResult<Self> {
        Self::open_preferred(
            paths::cache_dir(dir_name),
            paths::constrained_cache_dir(dir_name),
            max_size,
            constrained_max_size,
        )
    }

    fn open_preferred(
        preferred: Option<PathBuf>,
        fallback: PathBuf,
        max_size: u64,
        constrained_max_size: u64,
    ) -> CacheResult<Self> {
        if let Some(dir) = preferred {
            match Self::open(dir, max_size) {
                Ok(cache) => return Ok(cache),
                Err(e) => warn!(error = %e, "Platform cache directory unusable"),
            }
        }

        warn!(
            dir = %fallback.display(),
            max_size = constrained_max_size,
            "Using constrained disk cache"
        );
        Self::open(fallback, constrained_max_size)
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns true if `id` is stored.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.lock().entries.contains(&id.cache_key())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    /// Evicts least recently used entries until under budget.
    fn trim(&self, index: &mut DiskIndex) {
        if index.size <= self.max_size {
            return;
        }

        debug!(
            current_size = index.size,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        while index.size > self.max_size {
            let Some((key, size)) = index.entries.pop_lru() else {
                break;
            };
            let path = self.entry_path(&key);
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
            }
            index.size = index.size.saturating_sub(size);
            freed_size += size;
            freed_count += 1;
        }

        debug!(
            freed_size = freed_size,
            freed_count = freed_count,
            "Disk cache cleanup complete"
        );
    }
}

impl DiskCache for DiskImageCache {
    /// Lookup, read and recency update happen under the index lock, so a
    /// concurrent trim cannot leave the index pointing at a deleted file.
    fn get(&self, id: &ResourceId) -> Option<Bytes> {
        if self.ensure_open().is_err() {
            return None;
        }
        let key = id.cache_key();
        let path = self.entry_path(&key);

        let mut index = self.index.lock();
        match fs::read(&path) {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                if index.entries.get(&key).is_none() {
                    index.size += size;
                    index.entries.put(key, size);
                }
                trace!(id = %id, path = %path.display(), "Disk cache hit");
                Some(Bytes::from(bytes))
            }
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(id = %id, error = %e, "Failed to read disk cache entry");
                }
                if let Some(size) = index.entries.pop(&key) {
                    index.size = index.size.saturating_sub(size);
                }
                trace!(id = %id, "Disk cache miss");
                None
            }
        }
    }

    fn put(&self, id: &ResourceId, content: &mut dyn Read) -> CacheResult<()> {
        self.ensure_open()?;
        let key = id.cache_key();

        let mut temp = tempfile::Builder::new()
            .prefix(&key)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.cache_dir)
            .map_err(|e| CacheError::IoError(format!("Failed to create cache file: {e}")))?;

        let written = std::io::copy(content, temp.as_file_mut())
            .map_err(|e| CacheError::IoError(format!("Failed to write cache file: {e}")))?;

        temp.as_file()
            .sync_all()
            .map_err(|e| CacheError::IoError(format!("Failed to flush cache file: {e}")))?;

        let path = self.entry_path(&key);
        let mut index = self.index.lock();
        temp.persist(&path)
            .map_err(|e| CacheError::IoError(format!("Failed to publish cache file: {}", e.error)))?;

        if let Some(old) = index.entries.put(key, written) {
            index.size = index.size.saturating_sub(old);
        }
        index.size += written;

        debug!(id = %id, path = %path.display(), size = written, "Stored image in disk cache");

        self.trim(&mut index);
        Ok(())
    }

    fn remove(&self, id: &ResourceId) -> CacheResult<bool> {
        let key = id.cache_key();
        let path = self.entry_path(&key);
        let mut index = self.index.lock();
        match fs::remove_file(&path) {
            Ok(()) => {
                if let Some(size) = index.entries.pop(&key) {
                    index.size = index.size.saturating_sub(size);
                }
                debug!(id = %id, "Evicted from disk cache");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(size) = index.entries.pop(&key) {
                    index.size = index.size.saturating_sub(size);
                }
                Ok(false)
            }
            Err(e) => Err(CacheError::IoError(format!(
                "Failed to remove cache file: {e}"
            ))),
        }
    }

    fn size(&self) -> u64 {
        self.index.lock().size
    }

    fn max_size(&self) -> u64 {
        self.max_size
    }

    fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    fn clear(&self) -> CacheResult<()> {
        let mut index = self.index.lock();
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| CacheError::IoError(format!("Failed to read cache dir: {e}")))?;

        for entry in entries {
            let entry =
                entry.map_err(|e| CacheError::IoError(format!("Failed to read entry: {e}")))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
                && fs::remove_file(&path).is_err()
            {
                warn!(path = %path.display(), "Failed to remove cache file");
            }
        }
        index.entries.clear();
        index.size = 0;
        debug!("Cleared disk cache");
        Ok(())
    }

    fn close(&self) -> CacheResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(dir = %self.cache_dir.display(), "Closed disk cache");
        }
        Ok(())
    }
}

fn verify_marker(dir: &Path) -> CacheResult<()> {
    let marker = dir.join(MARKER_FILE);
    match fs::read_to_string(&marker) {
        Ok(content) if content == MARKER_CONTENT => Ok(()),
        Ok(_) => Err(CacheError::Corrupt("unknown cache version".to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if has_entries(dir)? {
                return Err(CacheError::Corrupt("entries without version marker".to_string()));
            }
            write_marker(dir)
        }
        Err(e) => Err(CacheError::Corrupt(format!("unreadable version marker: {e}"))),
    }
}

fn write_marker(dir: &Path) -> CacheResult<()> {
    fs::write(dir.join(MARKER_FILE), MARKER_CONTENT)
        .map_err(|e| CacheError::IoError(format!("Failed to write version marker: {e}")))
}

fn has_entries(dir: &Path) -> CacheResult<bool> {
    let entries = fs::read_dir(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to read cache dir: {e}")))?;
    Ok(entries
        .filter_map(Result::ok)
        .any(|entry| entry.path().extension().is_some_and(|ext| ext == ENTRY_EXTENSION)))
}

fn reset_dir(dir: &Path) -> CacheResult<()> {
    fs::remove_dir_all(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to reset cache dir: {e}")))?;
    fs::create_dir_all(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;
    write_marker(dir)
}

/// Lists valid entries oldest first and deletes temp files left behind by an
/// interrupted write.
fn scan_entries(dir: &Path) -> CacheResult<Vec<(String, u64)>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to read cache dir: {e}")))?;

    let mut found: Vec<(String, SystemTime, u64)> = Vec::new();
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.ends_with(TEMP_SUFFIX) {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale temp file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
            }
            continue;
        }

        let Some(key) = name.strip_suffix(&format!(".{ENTRY_EXTENSION}")) else {
            continue;
        };
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }

        if let Ok(meta) = entry.metadata() {
            let touched = meta
                .accessed()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((key.to_string(), touched, meta.len()));
        }
    }

    found.sort_by_key(|(_, time, _)| *time);
    Ok(found
        .into_iter()
        .map(|(key, _, size)| (key, size))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_cache(max_size: u64) -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), max_size).unwrap();
        (cache, temp_dir)
    }

    #[test]
    fn test_put_and_get_bytes() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let id = ResourceId::new("https://example.com/a.png");

        cache.put_bytes(&id, b"test image data").unwrap();

        assert_eq!(cache.get(&id).as_deref(), Some(&b"test image data"[..]));
        assert!(cache.contains(&id));
    }

    #[test]
    fn test_cache_miss() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        assert!(cache.get(&ResourceId::new("nonexistent")).is_none());
    }

    #[test]
    fn test_keys_with_unsafe_characters() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let id = ResourceId::new("https://example.com/a b?c=d&e=../../f:g*h");

        cache.put_bytes(&id, b"ok").unwrap();

        assert_eq!(cache.get(&id).as_deref(), Some(&b"ok"[..]));
    }

    #[test]
    fn test_put_from_reader() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let id = ResourceId::new("stream");
        let mut reader = std::io::Cursor::new(vec![7u8; 3000]);

        cache.put(&id, &mut reader).unwrap();

        assert_eq!(cache.get(&id).map(|b| b.len()), Some(3000));
        assert_eq!(cache.size(), 3000);
    }

    #[test]
    fn test_counters_track_overwrite_and_remove() {
        let (cache, _temp) = create_test_cache(1024 * 1024);

        cache.put_bytes(&ResourceId::new("test1"), b"hello").unwrap();
        cache.put_bytes(&ResourceId::new("test2"), b"world!").unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size(), 11);

        cache.put_bytes(&ResourceId::new("test1"), b"hey").unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size(), 9);

        assert!(cache.remove(&ResourceId::new("test2")).unwrap());
        assert!(!cache.remove(&ResourceId::new("test2")).unwrap());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 3);

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_trim_evicts_least_recently_used() {
        let (cache, _temp) = create_test_cache(10);
        let first = ResourceId::new("test1");
        let second = ResourceId::new("test2");
        let third = ResourceId::new("test3");

        cache.put_bytes(&first, b"1234").unwrap();
        cache.put_bytes(&second, b"1234").unwrap();
        assert!(cache.get(&first).is_some());
        cache.put_bytes(&third, b"1234").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&second).is_none());
        assert!(cache.get(&first).is_some());
        assert!(cache.get(&third).is_some());
        assert!(cache.size() <= cache.max_size());
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        let id = ResourceId::new("persisted");
        {
            let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();
            cache.put_bytes(&id, b"kept").unwrap();
            cache.close().unwrap();
        }

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 4);
        assert_eq!(cache.get(&id).as_deref(), Some(&b"kept"[..]));
    }

    #[test]
    fn test_reopen_removes_stale_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();
            cache.put_bytes(&ResourceId::new("a"), b"data").unwrap();
        }
        let stale = temp_dir.path().join(format!("{}abc{TEMP_SUFFIX}", "0".repeat(64)));
        fs::write(&stale, b"half written").unwrap();

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();

        assert!(!stale.exists());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_corrupt_store_is_reset() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();
            cache.put_bytes(&ResourceId::new("a"), b"data").unwrap();
        }
        fs::write(temp_dir.path().join(MARKER_FILE), b"\x00garbage").unwrap();

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();

        assert!(cache.is_empty());
        assert!(cache.get(&ResourceId::new("a")).is_none());
        cache.put_bytes(&ResourceId::new("b"), b"fresh").unwrap();
        assert_eq!(cache.get(&ResourceId::new("b")).as_deref(), Some(&b"fresh"[..]));
    }

    #[test]
    fn test_closed_cache_rejects_access() {
        let (cache, _temp) = create_test_cache(1024);
        let id = ResourceId::new("a");
        cache.put_bytes(&id, b"data").unwrap();
        cache.close().unwrap();

        assert!(cache.get(&id).is_none());
        assert!(matches!(cache.put_bytes(&id, b"x"), Err(CacheError::Closed)));
    }

    #[test]
    fn test_unusable_directory_falls_back_to_constrained_cache() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let fallback = temp_dir.path().join("fallback");

        let cache =
            DiskImageCache::open_preferred(Some(blocker.join("cache")), fallback.clone(), 1024, 16)
                .unwrap();

        assert_eq!(cache.dir(), fallback);
        assert_eq!(cache.max_size(), 16);
        cache.put_bytes(&ResourceId::new("a"), b"0123456789").unwrap();
        cache.put_bytes(&ResourceId::new("b"), b"0123456789").unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_usable_directory_keeps_full_budget() {
        let temp_dir = TempDir::new().unwrap();
        let preferred = temp_dir.path().join("preferred");

        let cache = DiskImageCache::open_preferred(
            Some(preferred.clone()),
            temp_dir.path().join("fallback"),
            1024,
            16,
        )
        .unwrap();

        assert_eq!(cache.dir(), preferred);
        assert_eq!(cache.max_size(), 1024);
    }

    #[test]
    fn test_get_after_trim_keeps_index_consistent() {
        let (cache, temp) = create_test_cache(8);
        let first = ResourceId::new("first");
        let second = ResourceId::new("second");
        cache.put_bytes(&first, b"1234").unwrap();
        cache.put_bytes(&second, b"12345678").unwrap();

        assert!(cache.get(&first).is_none());
        assert!(!cache.contains(&first));
        assert!(!temp.path().join(format!("{}.{ENTRY_EXTENSION}", first.cache_key())).exists());
        assert_eq!(cache.size(), 8);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_put_and_get_never_sees_partial_content() {
        let (cache, _temp) = create_test_cache(64 * 1024 * 1024);
        let cache = Arc::new(cache);
        let id = ResourceId::new("contended");
        let old = vec![b'a'; 256 * 1024];
        let new = vec![b'b'; 256 * 1024];
        cache.put_bytes(&id, &old).unwrap();

        let writer = {
            let cache = cache.clone();
            let id = id.clone();
            let (old, new) = (old.clone(), new.clone());
            std::thread::spawn(move || {
                for i in 0..20 {
                    let body = if i % 2 == 0 { &new } else { &old };
                    cache.put_bytes(&id, body).unwrap();
                }
            })
        };

        for _ in 0..200 {
            let bytes = cache.get(&id).expect("entry is always published");
            assert!(bytes[..] == old[..] || bytes[..] == new[..]);
        }
        writer.join().unwrap();
    }
}
