//! Delivery of finished results to caches, consumers and listeners.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::domain::entities::{DecodedImage, Level, ResourceId};
use crate::domain::ports::{Consumer, MemoryCache};

use super::fetch_unit::{Binding, FetchUnit};

/// Decides what happens to a finished unit's image.
pub struct ResultSink {
    memory: Arc<dyn MemoryCache>,
    eager_retention: Level,
}

impl ResultSink {
    /// Creates a sink writing retained images into `memory`. Levels at or
    /// below `eager_retention` are cached even with nobody watching.
    #[must_use]
    pub fn new(memory: Arc<dyn MemoryCache>, eager_retention: Level) -> Self {
        Self {
            memory,
            eager_retention,
        }
    }

    /// Whether a result at `level` with `binding` goes into the memory cache.
    #[must_use]
    pub fn should_retain(&self, level: Level, binding: &Binding) -> bool {
        binding.has_live_consumer() || level.outranks_or_equals(self.eager_retention)
    }

    /// Caches the unit's image if it qualifies.
    pub(crate) fn retain(&self, unit: &FetchUnit, binding: &Binding, image: &DecodedImage) {
        if !self.should_retain(unit.level(), binding) {
            trace!(id = %unit.id(), level = %unit.level(), "Result not retained in memory");
            return;
        }
        if self.memory.put(unit.id().clone(), image.clone()) {
            trace!(id = %unit.id(), "Retained result in memory");
        }
    }

    /// Offers `image` to `consumer` under promotion rules.
    pub fn apply(
        &self,
        consumer: &dyn Consumer,
        generation: u64,
        id: &ResourceId,
        level: Level,
        image: &DecodedImage,
    ) -> bool {
        let applied = consumer
            .display_state()
            .promote_with(generation, id, level, || consumer.apply_result(level, image));
        if applied {
            debug!(id = %id, level = %level, "Displayed image");
        } else {
            trace!(id = %id, level = %level, "Result lost to the displayed level");
        }
        applied
    }

    /// Hands a successful result to whoever is bound.
    pub(crate) fn deliver(&self, unit: &FetchUnit, binding: &Binding, image: &DecodedImage) {
        let level = binding.level;
        if let Some(handle) = &binding.consumer {
            let Some(consumer) = handle.upgrade() else {
                trace!(id = %unit.id(), "Consumer gone, dropping result");
                return;
            };
            self.apply(consumer.as_ref(), binding.generation, unit.id(), level, image);
            if consumer.display_state().generation() != binding.generation {
                return;
            }
        }
        if let Some(listener) = &binding.listener {
            listener.on_image_loaded(level);
        }
    }

    /// Reports a failure to whoever is bound.
    pub(crate) fn deliver_failure(&self, unit: &FetchUnit, binding: &Binding) {
        let level = binding.level;
        if let Some(handle) = &binding.consumer {
            let Some(consumer) = handle.upgrade() else {
                return;
            };
            if !consumer
                .display_state()
                .accepts_failure(binding.generation, unit.id())
            {
                return;
            }
            consumer.apply_failure(level);
        }
        if let Some(listener) = &binding.listener {
            listener.on_image_failed(level);
        }
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("eager_retention", &self.eager_retention)
            .finish_non_exhaustive()
    }
}
