//! Port for fetching raw resource bytes.

use bytes::Bytes;

use crate::domain::entities::ResourceId;
use crate::domain::errors::FetchError;

/// Blocking byte transport, invoked from worker threads only.
pub trait Transport: Send + Sync {
    /// Fetches the full content of `id`.
    ///
    /// # Errors
    /// Returns `FetchError::Transport` on any network failure.
    fn fetch(&self, id: &ResourceId) -> Result<Bytes, FetchError>;
}
