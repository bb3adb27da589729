//! Fetch pipeline error types.

use thiserror::Error;

/// Why a tier failed to load.
///
/// None of these is fatal to the process; each one degrades to
/// "this tier did not load". Disk corruption never gets this far: the disk
/// cache resets itself and reports a miss (see `CacheError::Corrupt`).
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum FetchError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("resource exhausted while decoding: {message}")]
    ResourceExhausted { message: String },
}

impl FetchError {
    /// Creates transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates resource exhausted error.
    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Returns whether the fetch unit retries in place.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }

    /// Returns whether error is network related.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
