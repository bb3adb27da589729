//! Domain types for image handling.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identifier of a fetchable resource, usually its URL.
/// Identity for both deduplication and caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a new `ResourceId` from any string-like input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical storage key: hex-encoded SHA-256 of the identifier.
    ///
    /// The result only contains `[0-9a-f]` so it is valid as a file name on
    /// every platform, whatever characters the identifier itself holds.
    #[must_use]
    pub fn cache_key(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Priority/resolution tier of a resource within one request.
///
/// Lower numbers mean higher fidelity and higher priority. Level 0 is the
/// placeholder tier and is never fetched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Level(u32);

impl Level {
    /// The placeholder tier.
    pub const PLACEHOLDER: Self = Self(0);

    /// Creates a level from its numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns true for the placeholder tier.
    #[must_use]
    pub const fn is_placeholder(self) -> bool {
        self.0 == 0
    }

    /// Returns true if a result at this level may replace one at `current`.
    #[must_use]
    pub const fn outranks_or_equals(self, current: Self) -> bool {
        self.0 <= current.0
    }
}

impl From<u32> for Level {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded image shared between the caches and consumers.
#[derive(Clone)]
pub struct DecodedImage {
    pixels: Arc<image::DynamicImage>,
}

impl DecodedImage {
    /// Wraps a decoded image.
    #[must_use]
    pub fn new(image: image::DynamicImage) -> Self {
        Self {
            pixels: Arc::new(image),
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Memory footprint of the pixel buffer in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.pixels.as_bytes().len() as u64
    }

    /// An image with no pixels is treated as released.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }

    /// Borrows the underlying image.
    #[must_use]
    pub fn as_dynamic(&self) -> &image::DynamicImage {
        &self.pixels
    }

    /// Returns true if both handles share the same pixel buffer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("bytes", &self.byte_size())
            .finish()
    }
}

/// Lifecycle of a scheduled fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchState {
    /// Constructed, not yet admitted to a pool.
    #[default]
    Created,
    /// Waiting in a pool queue.
    Queued,
    /// Picked up by a worker.
    Running,
    /// Decoded successfully.
    Completed,
    /// Fetch or decode failed.
    Failed,
    /// Stopped before producing a result.
    Cancelled,
}

impl FetchState {
    /// Returns true once no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the unit has not started running yet.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Created | Self::Queued)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Queued | Self::Cancelled)
                | (Self::Queued, Self::Running | Self::Cancelled)
                | (
                    Self::Running,
                    Self::Completed | Self::Failed | Self::Cancelled
                )
        )
    }
}

impl std::fmt::Display for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory LRU cache.
    MemoryCache,
    /// Loaded from the disk cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_cache_key_is_hex_and_stable() {
        let id = ResourceId::new("https://example.com/image.png");
        let key = id.cache_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, ResourceId::new("https://example.com/image.png").cache_key());
    }

    #[test]
    fn test_cache_key_handles_unsafe_characters() {
        let a = ResourceId::new("https://example.com/a?b=c/../d:*|<>");
        let b = ResourceId::new("https://example.com/a?b=c/../d:*|<>x");
        assert!(!a.cache_key().contains('/'));
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::new(1).outranks_or_equals(Level::new(2)));
        assert!(Level::new(2).outranks_or_equals(Level::new(2)));
        assert!(!Level::new(3).outranks_or_equals(Level::new(1)));
        assert!(Level::PLACEHOLDER.is_placeholder());
    }

    #[test]
    fn test_decoded_image_footprint() {
        let img = DecodedImage::new(image::DynamicImage::new_rgba8(10, 4));
        assert_eq!(img.byte_size(), 160);
        assert!(img.is_valid());
        assert!(!DecodedImage::new(image::DynamicImage::new_rgb8(0, 0)).is_valid());
    }

    #[test_case(FetchState::Created, FetchState::Queued, true ; "created_to_queued")]
    #[test_case(FetchState::Created, FetchState::Cancelled, true ; "created_to_cancelled")]
    #[test_case(FetchState::Queued, FetchState::Running, true ; "queued_to_running")]
    #[test_case(FetchState::Running, FetchState::Completed, true ; "running_to_completed")]
    #[test_case(FetchState::Running, FetchState::Queued, false ; "running_back_to_queued")]
    #[test_case(FetchState::Created, FetchState::Running, false ; "created_skips_queue")]
    #[test_case(FetchState::Completed, FetchState::Cancelled, false ; "terminal_is_final")]
    #[test_case(FetchState::Cancelled, FetchState::Running, false ; "cancelled_is_final")]
    fn test_state_transitions(from: FetchState, to: FetchState, allowed: bool) {
        assert_eq!(from.can_advance_to(to), allowed);
    }
}
