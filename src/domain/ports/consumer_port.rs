//! Port for whoever displays loaded images.

use std::sync::{Arc, Weak};

use crate::domain::entities::{DecodedImage, DisplayState, Level};

/// A display target for loaded images, e.g. a widget.
///
/// Callbacks run on worker threads while the fetch unit's binding is
/// locked. They may read [`Consumer::display_state`], which already shows
/// the level being applied. Implementations must not issue new load
/// requests from inside them; hand off to the owning thread instead.
pub trait Consumer: Send + Sync {
    /// Interest set and currently displayed level.
    fn display_state(&self) -> &DisplayState;

    /// Shows `image`, which has been accepted at `level`.
    fn apply_result(&self, level: Level, image: &DecodedImage);

    /// Called when `level` could not be loaded.
    fn apply_failure(&self, _level: Level) {}
}

/// Caller callback attached to a request.
pub trait LoadListener: Send + Sync {
    /// A tier finished loading.
    fn on_image_loaded(&self, level: Level);

    /// A tier failed to load.
    fn on_image_failed(&self, level: Level);
}

/// Non-owning reference to a [`Consumer`].
///
/// Never keeps the consumer alive; every use re-checks liveness.
#[derive(Clone)]
pub struct ConsumerHandle {
    inner: Weak<dyn Consumer>,
}

impl ConsumerHandle {
    /// Creates a handle to `consumer`.
    #[must_use]
    pub fn new<C: Consumer + 'static>(consumer: &Arc<C>) -> Self {
        let weak: Weak<C> = Arc::downgrade(consumer);
        Self { inner: weak }
    }

    /// Returns the consumer if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<dyn Consumer>> {
        self.inner.upgrade()
    }

    /// Returns true if the consumer has not been dropped.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Identity comparison.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// Something a consumer or listener was told.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Notice {
        /// A result was displayed.
        Applied(Level),
        /// A failure was reported.
        Failed(Level),
    }

    /// Consumer that records every callback.
    #[derive(Default)]
    pub struct RecordingConsumer {
        state: DisplayState,
        notices: Mutex<Vec<Notice>>,
    }

    impl RecordingConsumer {
        /// Creates a consumer showing the placeholder.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Callbacks received so far.
        pub fn notices(&self) -> Vec<Notice> {
            self.notices.lock().clone()
        }

        /// Level currently displayed.
        pub fn displayed(&self) -> Option<Level> {
            self.state.current_level()
        }
    }

    impl Consumer for RecordingConsumer {
        fn display_state(&self) -> &DisplayState {
            &self.state
        }

        fn apply_result(&self, level: Level, _image: &DecodedImage) {
            self.notices.lock().push(Notice::Applied(level));
        }

        fn apply_failure(&self, level: Level) {
            self.notices.lock().push(Notice::Failed(level));
        }
    }

    /// Listener that records every callback.
    #[derive(Default)]
    pub struct RecordingListener {
        notices: Mutex<Vec<Notice>>,
    }

    impl RecordingListener {
        /// Creates an empty listener.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Callbacks received so far.
        pub fn notices(&self) -> Vec<Notice> {
            self.notices.lock().clone()
        }
    }

    impl LoadListener for RecordingListener {
        fn on_image_loaded(&self, level: Level) {
            self.notices.lock().push(Notice::Applied(level));
        }

        fn on_image_failed(&self, level: Level) {
            self.notices.lock().push(Notice::Failed(level));
        }
    }
}
