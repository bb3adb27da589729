//! Per-consumer display bookkeeping.

use parking_lot::Mutex;

use super::image::{Level, ResourceId};
use super::level_map::LevelMap;

/// Point-in-time copy of a [`DisplayState`].
#[derive(Debug, Clone, Default)]
pub struct DisplaySnapshot {
    /// Resources the consumer currently wants.
    pub interest: LevelMap,
    /// Level currently displayed, `None` while the placeholder is shown.
    pub level: Option<Level>,
    /// Resource currently displayed.
    pub resource: Option<ResourceId>,
    /// Bumped every time the interest set changes.
    pub generation: u64,
}

/// What a consumer is interested in and what it currently shows.
///
/// Owned by the consumer; the loader reads and updates it through
/// [`crate::domain::ports::Consumer::display_state`].
#[derive(Debug, Default)]
pub struct DisplayState {
    inner: Mutex<DisplaySnapshot>,
    delivery: Mutex<()>,
}

impl DisplayState {
    /// Creates an empty state showing the placeholder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> DisplaySnapshot {
        self.inner.lock().clone()
    }

    /// Level currently displayed.
    #[must_use]
    pub fn current_level(&self) -> Option<Level> {
        self.inner.lock().level
    }

    /// Current interest generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Returns true if `levels` names exactly the resources already wanted.
    #[must_use]
    pub fn has_interest(&self, levels: &LevelMap) -> bool {
        self.inner.lock().interest.same_resources(levels)
    }

    /// Replaces the interest set, resets the display to the placeholder and
    /// returns the new generation.
    pub fn begin(&self, interest: LevelMap) -> u64 {
        let mut state = self.inner.lock();
        state.generation += 1;
        state.interest = interest;
        state.level = None;
        state.resource = None;
        state.generation
    }

    /// Forgets the interest set so the next request is never a no-op.
    pub fn reset(&self) {
        self.begin(LevelMap::new());
    }

    /// Applies a result if it belongs to the current generation and does not
    /// lose to what is already shown.
    ///
    /// The new level is committed before `apply` runs, and `apply` runs with
    /// the state unlocked so it may read this state. Concurrent promotions
    /// are serialized on a separate delivery lock and reach the consumer in
    /// the order they were committed.
    pub fn promote_with<F: FnOnce()>(
        &self,
        generation: u64,
        id: &ResourceId,
        level: Level,
        apply: F,
    ) -> bool {
        let _delivery = self.delivery.lock();
        {
            let mut state = self.inner.lock();
            if state.generation != generation || state.interest.get(id) != Some(level) {
                return false;
            }
            if state
                .level
                .is_some_and(|current| !level.outranks_or_equals(current))
            {
                return false;
            }
            state.level = Some(level);
            state.resource = Some(id.clone());
        }
        apply();
        true
    }

    /// Returns true if a failure for `id` is still relevant to this consumer.
    #[must_use]
    pub fn accepts_failure(&self, generation: u64, id: &ResourceId) -> bool {
        let state = self.inner.lock();
        state.generation == generation && state.interest.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn interest() -> LevelMap {
        [("a", 1u32), ("b", 3)].into_iter().collect()
    }

    #[test_case(&[("a", 1), ("b", 3)], 1 ; "low_then_high")]
    #[test_case(&[("b", 3), ("a", 1)], 1 ; "high_then_low")]
    #[test_case(&[("b", 3)], 3 ; "only_high")]
    fn test_monotonic_promotion(arrivals: &[(&str, u32)], expected: u32) {
        let state = DisplayState::new();
        let generation = state.begin(interest());
        for (id, level) in arrivals {
            state.promote_with(generation, &ResourceId::new(*id), Level::new(*level), || {});
        }
        assert_eq!(state.current_level(), Some(Level::new(expected)));
    }

    #[test]
    fn test_rejected_promotion_skips_apply() {
        let state = DisplayState::new();
        let generation = state.begin(interest());
        let a = ResourceId::new("a");
        let b = ResourceId::new("b");
        assert!(state.promote_with(generation, &a, Level::new(1), || {}));

        let mut called = false;
        assert!(!state.promote_with(generation, &b, Level::new(3), || called = true));
        assert!(!called);
        assert_eq!(state.snapshot().resource, Some(a));
    }

    #[test]
    fn test_apply_may_read_state() {
        let state = DisplayState::new();
        let generation = state.begin(interest());
        let a = ResourceId::new("a");

        let mut seen = None;
        assert!(state.promote_with(generation, &a, Level::new(1), || {
            seen = state.current_level();
            assert_eq!(state.snapshot().resource, Some(ResourceId::new("a")));
        }));
        assert_eq!(seen, Some(Level::new(1)));
    }

    #[test]
    fn test_stale_generation_rejected() {
        let state = DisplayState::new();
        let old = state.begin(interest());
        let _new = state.begin(interest());
        assert!(!state.promote_with(old, &ResourceId::new("a"), Level::new(1), || {}));
        assert_eq!(state.current_level(), None);
    }

    #[test]
    fn test_foreign_resource_rejected() {
        let state = DisplayState::new();
        let generation = state.begin(interest());
        assert!(!state.promote_with(generation, &ResourceId::new("zzz"), Level::new(1), || {}));
        assert!(!state.accepts_failure(generation, &ResourceId::new("zzz")));
        assert!(state.accepts_failure(generation, &ResourceId::new("b")));
    }

    #[test]
    fn test_reset_clears_interest() {
        let state = DisplayState::new();
        state.begin(interest());
        assert!(state.has_interest(&interest()));
        state.reset();
        assert!(!state.has_interest(&interest()));
        assert!(state.snapshot().interest.is_empty());
    }
}
