//! One deduplicated fetch-and-decode job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::domain::entities::{DecodedImage, FetchState, ImageSource, Level, ResourceId};
use crate::domain::errors::FetchError;
use crate::domain::ports::{
    ConsumerHandle, Decoder, DiskCache, LoadListener, MemoryCache, Transport,
};

use super::dispatcher::PoolKind;

/// Who hears about a unit's result.
#[derive(Clone, Default)]
pub struct Binding {
    /// Weak reference to the displaying consumer.
    pub consumer: Option<ConsumerHandle>,
    /// Interest generation of the consumer when it was bound.
    pub generation: u64,
    /// Level the binding request asked for.
    pub level: Level,
    /// Caller callback.
    pub listener: Option<Arc<dyn LoadListener>>,
}

impl Binding {
    /// Binding with no consumer and no listener.
    #[must_use]
    pub fn detached(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Returns true if the bound consumer is still alive.
    #[must_use]
    pub fn has_live_consumer(&self) -> bool {
        self.consumer.as_ref().is_some_and(ConsumerHandle::is_alive)
    }

    /// Returns true if anyone would be told about the result.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.has_live_consumer() || (self.consumer.is_none() && self.listener.is_some())
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("consumer", &self.consumer)
            .field("generation", &self.generation)
            .field("level", &self.level)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

/// Collaborators a unit needs while running on a worker.
pub struct Pipeline {
    /// Decoded image cache.
    pub memory: Arc<dyn MemoryCache>,
    /// Raw byte cache.
    pub disk: Arc<dyn DiskCache>,
    /// Network access.
    pub transport: Arc<dyn Transport>,
    /// Byte to pixel conversion.
    pub decoder: Arc<dyn Decoder>,
    /// Process-wide stop flag, checked at every checkpoint.
    pub exit_early: Arc<AtomicBool>,
    /// Total decode attempts when memory runs out.
    pub decode_attempts: u32,
    /// Pause between decode attempts.
    pub retry_backoff: Duration,
}

/// How a run ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed {
        image: DecodedImage,
        source: ImageSource,
    },
    Failed(FetchError),
    Cancelled,
}

struct Slot {
    state: FetchState,
    binding: Binding,
}

/// A scheduled fetch of one resource at one level.
///
/// At most one non-terminal unit exists per resource; the dispatcher owns it
/// from creation until it reaches a terminal state.
pub struct FetchUnit {
    id: ResourceId,
    level: Level,
    target_size: u32,
    cancellable: bool,
    cancelled: AtomicBool,
    slot: Mutex<Slot>,
}

impl FetchUnit {
    /// Creates a unit in the `Created` state.
    #[must_use]
    pub fn new(
        id: ResourceId,
        level: Level,
        target_size: u32,
        cancellable: bool,
        binding: Binding,
    ) -> Self {
        Self {
            id,
            level,
            target_size,
            cancellable,
            cancelled: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                state: FetchState::Created,
                binding,
            }),
        }
    }

    /// Resource being fetched.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Level the unit was created for.
    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Whether reconciliation may cancel the unit.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    /// Pool the unit runs on.
    #[must_use]
    pub const fn pool(&self) -> PoolKind {
        if self.cancellable {
            PoolKind::Cancellable
        } else {
            PoolKind::Standard
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FetchState {
        self.slot.lock().state
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Copy of the current binding.
    #[must_use]
    pub fn binding(&self) -> Binding {
        self.slot.lock().binding.clone()
    }

    /// Returns true if the unit is bound to `consumer`.
    #[must_use]
    pub fn is_bound_to(&self, consumer: &ConsumerHandle) -> bool {
        self.slot
            .lock()
            .binding
            .consumer
            .as_ref()
            .is_some_and(|bound| bound.same_as(consumer))
    }

    /// Replaces the binding. Fails once the unit is terminal.
    pub fn attach(&self, binding: Binding) -> bool {
        let mut slot = self.slot.lock();
        if slot.state.is_terminal() {
            return false;
        }
        slot.binding = binding;
        true
    }

    /// Binds only if nobody is listening yet. Returns false once the unit is
    /// terminal; an already bound live unit counts as success.
    pub fn attach_if_unbound(&self, binding: Binding) -> bool {
        let mut slot = self.slot.lock();
        if slot.state.is_terminal() {
            return false;
        }
        if !slot.binding.is_bound() {
            slot.binding = binding;
        }
        true
    }

    /// Drops the consumer and listener; the unit keeps running.
    pub fn detach(&self) {
        let mut slot = self.slot.lock();
        let level = slot.binding.level;
        slot.binding = Binding::detached(level);
    }

    /// Sets the cancellation flag and detaches.
    pub(crate) fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.detach();
    }

    /// Applies a legal transition.
    pub(crate) fn advance(&self, next: FetchState) -> bool {
        let mut slot = self.slot.lock();
        if !slot.state.can_advance_to(next) {
            return false;
        }
        trace!(id = %self.id, from = %slot.state, to = %next, "Fetch unit transition");
        slot.state = next;
        true
    }

    /// Moves a unit that has not started running straight to `Cancelled`.
    pub(crate) fn cancel_pending(&self) -> bool {
        let mut slot = self.slot.lock();
        if !slot.state.is_pending() {
            return false;
        }
        slot.state = FetchState::Cancelled;
        true
    }

    /// Moves a running unit to a terminal state and returns the binding as
    /// it was at that moment.
    pub(crate) fn finish(&self, next: FetchState) -> Option<Binding> {
        let mut slot = self.slot.lock();
        if slot.state != FetchState::Running || !next.is_terminal() {
            return None;
        }
        slot.state = next;
        Some(slot.binding.clone())
    }

    /// Runs `f` with the binding locked, so a concurrent detach either
    /// happens before `f` sees it or after `f` returns.
    pub(crate) fn with_binding<R>(&self, f: impl FnOnce(&Binding) -> R) -> R {
        let slot = self.slot.lock();
        f(&slot.binding)
    }

    fn should_stop(&self, pipeline: &Pipeline) -> bool {
        self.is_cancelled() || pipeline.exit_early.load(Ordering::Acquire)
    }

    /// Memory, then disk, then network, then decode. Checks for
    /// cancellation on entry, again right before the disk lookup, before the
    /// network fetch and after decoding.
    pub(crate) fn execute(&self, pipeline: &Pipeline) -> Outcome {
        if self.should_stop(pipeline) {
            return Outcome::Cancelled;
        }

        if let Some(image) = pipeline.memory.get(&self.id) {
            return Outcome::Completed {
                image,
                source: ImageSource::MemoryCache,
            };
        }

        if self.should_stop(pipeline) {
            return Outcome::Cancelled;
        }
        if let Some(bytes) = pipeline.disk.get(&self.id) {
            match self.decode(pipeline, &bytes) {
                Ok(image) => return self.finish_decoded(pipeline, image, ImageSource::DiskCache),
                Err(Outcome::Failed(FetchError::Decode { message })) => {
                    warn!(id = %self.id, error = %message, "Cached bytes undecodable, refetching");
                    if let Err(e) = pipeline.disk.remove(&self.id) {
                        warn!(id = %self.id, error = %e, "Failed to drop bad disk entry");
                    }
                }
                Err(outcome) => return outcome,
            }
        }

        if self.should_stop(pipeline) {
            return Outcome::Cancelled;
        }

        let bytes = match pipeline.transport.fetch(&self.id) {
            Ok(bytes) => bytes,
            Err(e) => return Outcome::Failed(e),
        };
        if let Err(e) = pipeline.disk.put_bytes(&self.id, &bytes) {
            warn!(id = %self.id, error = %e, "Failed to cache to disk");
        }

        match self.decode(pipeline, &bytes) {
            Ok(image) => self.finish_decoded(pipeline, image, ImageSource::Network),
            Err(outcome) => outcome,
        }
    }

    fn finish_decoded(
        &self,
        pipeline: &Pipeline,
        image: DecodedImage,
        source: ImageSource,
    ) -> Outcome {
        if self.should_stop(pipeline) {
            debug!(id = %self.id, "Dropping decoded image of cancelled unit");
            return Outcome::Cancelled;
        }
        Outcome::Completed { image, source }
    }

    fn decode(&self, pipeline: &Pipeline, bytes: &Bytes) -> Result<DecodedImage, Outcome> {
        let mut attempt = 1;
        loop {
            match pipeline
                .decoder
                .decode(bytes, self.target_size, self.target_size)
            {
                Ok(image) => return Ok(image),
                Err(e) if e.is_retryable() && attempt < pipeline.decode_attempts => {
                    warn!(id = %self.id, attempt = attempt, error = %e, "Decode ran out of memory, retrying");
                    if self.should_stop(pipeline) {
                        return Err(Outcome::Cancelled);
                    }
                    std::thread::sleep(pipeline.retry_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(Outcome::Failed(e)),
            }
        }
    }
}

impl std::fmt::Debug for FetchUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchUnit")
            .field("id", &self.id)
            .field("level", &self.level)
            .field("cancellable", &self.cancellable)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
