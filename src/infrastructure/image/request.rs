//! Load request builder.

use std::sync::Arc;

use crate::domain::entities::{Level, LevelMap, ResourceId};
use crate::domain::ports::{Consumer, ConsumerHandle, LoadListener};

/// A set of resources with levels, optionally tied to a consumer.
///
/// ```ignore
/// let request = LoadRequest::new()
///     .with_level("https://cdn/full.png", 1)
///     .with_level("https://cdn/thumb.png", 2)
///     .for_consumer(&widget);
/// loader.load(request);
/// ```
#[derive(Clone, Default)]
pub struct LoadRequest {
    pub(crate) levels: LevelMap,
    pub(crate) target_size: Option<u32>,
    pub(crate) consumer: Option<ConsumerHandle>,
    pub(crate) listener: Option<Arc<dyn LoadListener>>,
}

impl LoadRequest {
    /// Empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` at `level`.
    #[must_use]
    pub fn with_level(mut self, id: impl Into<ResourceId>, level: impl Into<Level>) -> Self {
        self.levels.insert(id.into(), level.into());
        self
    }

    /// Ties the request to `consumer`, held weakly.
    #[must_use]
    pub fn for_consumer<C: Consumer + 'static>(mut self, consumer: &Arc<C>) -> Self {
        self.consumer = Some(ConsumerHandle::new(consumer));
        self
    }

    /// Adds a caller callback.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn LoadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Overrides the decode bound.
    #[must_use]
    pub const fn with_target_size(mut self, pixels: u32) -> Self {
        self.target_size = Some(pixels);
        self
    }

    /// Requested resources.
    #[must_use]
    pub const fn levels(&self) -> &LevelMap {
        &self.levels
    }

    /// Consumer the request is for, if any.
    #[must_use]
    pub const fn consumer(&self) -> Option<&ConsumerHandle> {
        self.consumer.as_ref()
    }
}

impl std::fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadRequest")
            .field("levels", &self.levels)
            .field("target_size", &self.target_size)
            .field("consumer", &self.consumer)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}
