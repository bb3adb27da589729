//! Worker pools and the deduplicating unit registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{FetchState, ResourceId};
use crate::domain::ports::ConsumerHandle;

use super::fetch_unit::{FetchUnit, Outcome, Pipeline};
use super::result_sink::ResultSink;
use super::work_queue::WorkQueue;

/// Which pool a unit runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Work that is never cancelled by reconciliation.
    Standard,
    /// Work that reconciliation may cancel.
    Cancellable,
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Cancellable => write!(f, "cancellable"),
        }
    }
}

/// Dispatcher failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher no longer accepts work.
    #[error("Dispatcher is shut down")]
    ShutDown,

    /// A worker thread could not be started.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Result of looking up or registering a unit.
#[derive(Debug)]
pub enum Admission {
    /// A new unit was registered and must be submitted.
    Created(Arc<FetchUnit>),
    /// A live unit for the resource already exists.
    DuplicateSuppressed(Arc<FetchUnit>),
}

/// Pool sizes and queue bound.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizes {
    /// Workers on the standard pool.
    pub standard: usize,
    /// Workers on the cancellable pool.
    pub cancellable: usize,
    /// Queue capacity per pool.
    pub queue_capacity: usize,
}

struct Shared {
    registry: Mutex<HashMap<ResourceId, Arc<FetchUnit>>>,
    idle: Condvar,
    pipeline: Pipeline,
    sink: Arc<ResultSink>,
}

impl Shared {
    fn run_worker(&self, kind: PoolKind, queue: &WorkQueue<FetchUnit>) {
        while let Some(unit) = queue.pop() {
            if !unit.advance(FetchState::Running) {
                trace!(id = %unit.id(), pool = %kind, "Skipping cancelled unit");
                continue;
            }
            let outcome = unit.execute(&self.pipeline);
            self.complete(&unit, outcome);
        }
        trace!(pool = %kind, "Worker exiting");
    }

    fn complete(&self, unit: &Arc<FetchUnit>, outcome: Outcome) {
        match outcome {
            Outcome::Completed { image, source } => {
                let Some(binding) = unit.finish(FetchState::Completed) else {
                    return;
                };
                debug!(id = %unit.id(), level = %unit.level(), source = ?source, "Image loaded");
                self.sink.retain(unit, &binding, &image);
                unit.with_binding(|current| self.sink.deliver(unit, current, &image));
            }
            Outcome::Failed(error) => {
                if unit.finish(FetchState::Failed).is_none() {
                    return;
                }
                warn!(id = %unit.id(), level = %unit.level(), error = %error, "Image load failed");
                unit.with_binding(|current| self.sink.deliver_failure(unit, current));
            }
            Outcome::Cancelled => {
                if unit.finish(FetchState::Cancelled).is_none() {
                    return;
                }
                debug!(id = %unit.id(), "Image load cancelled");
            }
        }
        self.on_terminal(unit);
    }

    fn on_terminal(&self, unit: &Arc<FetchUnit>) {
        let mut registry = self.registry.lock();
        if registry
            .get(unit.id())
            .is_some_and(|registered| Arc::ptr_eq(registered, unit))
        {
            registry.remove(unit.id());
        }
        if registry.is_empty() {
            self.idle.notify_all();
        }
    }
}

struct WorkerPool {
    kind: PoolKind,
    queue: Arc<WorkQueue<FetchUnit>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    fn start(
        kind: PoolKind,
        size: usize,
        capacity: usize,
        shared: &Arc<Shared>,
    ) -> Result<Self, DispatchError> {
        let queue = Arc::new(WorkQueue::new(capacity));
        let mut workers = Vec::with_capacity(size);
        for index in 0..size.max(1) {
            let shared = Arc::clone(shared);
            let worker_queue = Arc::clone(&queue);
            let handle = thread::Builder::new()
                .name(format!("imgtier-{kind}-{index}"))
                .spawn(move || shared.run_worker(kind, &worker_queue));
            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    queue.close();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(DispatchError::Spawn(e.to_string()));
                }
            }
        }
        Ok(Self {
            kind,
            queue,
            workers: Mutex::new(workers),
        })
    }

    fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                warn!(pool = %self.kind, "Worker thread panicked");
            }
        }
    }
}

/// Runs fetch units on two fixed pools and keeps at most one live unit
/// per resource.
pub struct Dispatcher {
    shared: Arc<Shared>,
    standard: WorkerPool,
    cancellable: WorkerPool,
}

impl Dispatcher {
    /// Starts both pools.
    ///
    /// # Errors
    /// Returns error if a worker thread cannot be spawned.
    pub fn start(
        sizes: PoolSizes,
        pipeline: Pipeline,
        sink: Arc<ResultSink>,
    ) -> Result<Self, DispatchError> {
        let shared = Arc::new(Shared {
            registry: Mutex::new(HashMap::new()),
            idle: Condvar::new(),
            pipeline,
            sink,
        });
        let standard = WorkerPool::start(
            PoolKind::Standard,
            sizes.standard,
            sizes.queue_capacity,
            &shared,
        )?;
        let cancellable = match WorkerPool::start(
            PoolKind::Cancellable,
            sizes.cancellable,
            sizes.queue_capacity,
            &shared,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                standard.queue.close();
                standard.join();
                return Err(e);
            }
        };
        info!(
            standard = sizes.standard,
            cancellable = sizes.cancellable,
            queue_capacity = sizes.queue_capacity,
            "Started image workers"
        );
        Ok(Self {
            shared,
            standard,
            cancellable,
        })
    }

    const fn pool(&self, kind: PoolKind) -> &WorkerPool {
        match kind {
            PoolKind::Standard => &self.standard,
            PoolKind::Cancellable => &self.cancellable,
        }
    }

    /// Returns the live unit for `id`, or registers the one built by `make`.
    /// Terminal units count as absent. Atomic with respect to other callers.
    pub fn obtain(&self, id: &ResourceId, make: impl FnOnce() -> FetchUnit) -> Admission {
        let mut registry = self.shared.registry.lock();
        if let Some(existing) = registry.get(id) {
            if !existing.state().is_terminal() {
                return Admission::DuplicateSuppressed(Arc::clone(existing));
            }
        }
        let unit = Arc::new(make());
        registry.insert(id.clone(), Arc::clone(&unit));
        Admission::Created(unit)
    }

    /// Queues a freshly created unit, waiting while its pool is full.
    ///
    /// # Errors
    /// Returns error once the dispatcher is shut down; the unit is then
    /// cancelled and unregistered.
    pub fn submit(&self, unit: &Arc<FetchUnit>) -> Result<(), DispatchError> {
        let pool = self.pool(unit.pool());
        if !unit.advance(FetchState::Queued) {
            return Ok(());
        }
        trace!(id = %unit.id(), pool = %pool.kind, "Queueing fetch unit");
        if pool.queue.push(Arc::clone(unit)).is_err() {
            unit.cancel_pending();
            self.shared.on_terminal(unit);
            return Err(DispatchError::ShutDown);
        }
        Ok(())
    }

    /// Live unit for `id`, if any.
    #[must_use]
    pub fn find_by_resource(&self, id: &ResourceId) -> Option<Arc<FetchUnit>> {
        self.shared
            .registry
            .lock()
            .get(id)
            .filter(|unit| !unit.state().is_terminal())
            .cloned()
    }

    /// Live units currently bound to `consumer`.
    #[must_use]
    pub fn find_by_consumer(&self, consumer: &ConsumerHandle) -> Vec<Arc<FetchUnit>> {
        self.shared
            .registry
            .lock()
            .values()
            .filter(|unit| unit.is_bound_to(consumer))
            .cloned()
            .collect()
    }

    /// Cancels `unit`: detaches it, drops it from its queue if it has not
    /// started, and otherwise lets the worker stop at its next checkpoint.
    pub fn cancel(&self, unit: &Arc<FetchUnit>) {
        unit.request_cancel();
        self.pool(unit.pool()).queue.remove(unit);
        if unit.cancel_pending() {
            debug!(id = %unit.id(), "Cancelled queued unit");
            self.shared.on_terminal(unit);
        }
    }

    /// Cancels every registered unit.
    pub fn cancel_all(&self) {
        let units: Vec<_> = self.shared.registry.lock().values().cloned().collect();
        debug!(count = units.len(), "Cancelling all image loads");
        for unit in &units {
            self.cancel(unit);
        }
    }

    /// Makes every running and future unit stop at its next checkpoint.
    pub fn set_exit_tasks_early(&self, exit: bool) {
        self.shared
            .pipeline
            .exit_early
            .store(exit, Ordering::Release);
    }

    /// Number of registered non-terminal units.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared
            .registry
            .lock()
            .values()
            .filter(|unit| !unit.state().is_terminal())
            .count()
    }

    /// Units waiting in `kind`'s queue.
    #[must_use]
    pub fn queued(&self, kind: PoolKind) -> usize {
        self.pool(kind).queue.len()
    }

    /// Blocks until no unit is registered or `timeout` elapses. Returns
    /// true if the dispatcher went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut registry = self.shared.registry.lock();
        while !registry.is_empty() {
            if self
                .shared
                .idle
                .wait_until(&mut registry, deadline)
                .timed_out()
            {
                return registry.is_empty();
            }
        }
        true
    }

    /// Stops accepting work, cancels whatever is still queued and joins the
    /// workers once they finish their current unit.
    pub fn shutdown(&self) {
        for pool in [&self.standard, &self.cancellable] {
            for unit in pool.queue.close() {
                unit.request_cancel();
                if unit.cancel_pending() {
                    self.shared.on_terminal(&unit);
                }
            }
        }
        self.standard.join();
        self.cancellable.join();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending_count())
            .field("standard_queued", &self.queued(PoolKind::Standard))
            .field("cancellable_queued", &self.queued(PoolKind::Cancellable))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Level;
    use crate::domain::ports::mocks::{InMemoryDiskCache, MockTransport, StubDecoder};
    use crate::infrastructure::image::LruMemoryCache;
    use crate::infrastructure::image::fetch_unit::Binding;
    use std::sync::atomic::AtomicBool;

    fn dispatcher(transport: Arc<MockTransport>, workers: usize) -> Dispatcher {
        bounded_dispatcher(transport, workers, 16)
    }

    fn bounded_dispatcher(
        transport: Arc<MockTransport>,
        workers: usize,
        queue_capacity: usize,
    ) -> Dispatcher {
        let memory = Arc::new(LruMemoryCache::with_capacity_bytes(1024 * 1024));
        let pipeline = Pipeline {
            memory: memory.clone(),
            disk: Arc::new(InMemoryDiskCache::new()),
            transport,
            decoder: Arc::new(StubDecoder),
            exit_early: Arc::new(AtomicBool::new(false)),
            decode_attempts: 3,
            retry_backoff: Duration::from_millis(1),
        };
        let sink = Arc::new(ResultSink::new(memory, Level::new(1)));
        Dispatcher::start(
            PoolSizes {
                standard: workers,
                cancellable: workers,
                queue_capacity,
            },
            pipeline,
            sink,
        )
        .unwrap()
    }

    fn make(id: &str, cancellable: bool) -> FetchUnit {
        FetchUnit::new(
            ResourceId::new(id),
            Level::new(1),
            64,
            cancellable,
            Binding::detached(Level::new(1)),
        )
    }

    fn created(admission: Admission) -> Arc<FetchUnit> {
        match admission {
            Admission::Created(unit) => unit,
            Admission::DuplicateSuppressed(_) => panic!("expected a new unit"),
        }
    }

    #[test]
    fn test_obtain_suppresses_duplicates() {
        let transport = Arc::new(MockTransport::gated());
        transport.respond("a", b"pixels");
        let dispatcher = dispatcher(transport.clone(), 1);
        let id = ResourceId::new("a");

        let unit = created(dispatcher.obtain(&id, || make("a", false)));
        dispatcher.submit(&unit).unwrap();
        let again = dispatcher.obtain(&id, || make("a", false));

        assert!(matches!(again, Admission::DuplicateSuppressed(ref u) if Arc::ptr_eq(u, &unit)));
        transport.release();
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(transport.calls("a"), 1);
        assert_eq!(unit.state(), FetchState::Completed);
    }

    #[test]
    fn test_terminal_unit_is_replaced() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("a", b"pixels");
        let dispatcher = dispatcher(transport, 1);
        let id = ResourceId::new("a");

        let first = created(dispatcher.obtain(&id, || make("a", false)));
        dispatcher.submit(&first).unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));

        let second = created(dispatcher.obtain(&id, || make("a", false)));
        assert!(!Arc::ptr_eq(&first, &second));
        dispatcher.cancel(&second);
    }

    #[test]
    fn test_cancel_queued_unit_never_runs() {
        let transport = Arc::new(MockTransport::gated());
        transport.respond("busy", b"pixels");
        transport.respond("queued", b"pixels");
        let dispatcher = dispatcher(transport.clone(), 1);

        let busy = created(dispatcher.obtain(&ResourceId::new("busy"), || make("busy", true)));
        dispatcher.submit(&busy).unwrap();
        let queued =
            created(dispatcher.obtain(&ResourceId::new("queued"), || make("queued", true)));
        dispatcher.submit(&queued).unwrap();

        dispatcher.cancel(&queued);
        assert_eq!(queued.state(), FetchState::Cancelled);
        assert!(dispatcher.find_by_resource(&ResourceId::new("queued")).is_none());

        transport.release();
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(transport.calls("queued"), 0);
        assert_eq!(busy.state(), FetchState::Completed);
    }

    #[test]
    fn test_cancel_running_unit_stops_at_checkpoint() {
        let transport = Arc::new(MockTransport::gated());
        transport.respond("a", b"pixels");
        let dispatcher = dispatcher(transport.clone(), 1);

        let unit = created(dispatcher.obtain(&ResourceId::new("a"), || make("a", true)));
        dispatcher.submit(&unit).unwrap();
        while unit.state() != FetchState::Running {
            thread::sleep(Duration::from_millis(1));
        }

        dispatcher.cancel(&unit);
        transport.release();

        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(unit.state(), FetchState::Cancelled);
    }

    #[test]
    fn test_failure_unregisters_unit() {
        let transport = Arc::new(MockTransport::new());
        let dispatcher = dispatcher(transport, 2);

        let unit = created(dispatcher.obtain(&ResourceId::new("missing"), || make("missing", false)));
        dispatcher.submit(&unit).unwrap();

        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(unit.state(), FetchState::Failed);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_wait_idle_times_out_while_busy() {
        let transport = Arc::new(MockTransport::gated());
        transport.respond("a", b"pixels");
        let dispatcher = dispatcher(transport.clone(), 1);

        let unit = created(dispatcher.obtain(&ResourceId::new("a"), || make("a", false)));
        dispatcher.submit(&unit).unwrap();

        assert!(!dispatcher.wait_idle(Duration::from_millis(20)));
        assert_eq!(dispatcher.pending_count(), 1);
        transport.release();
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_submit_waits_while_pool_is_full() {
        let transport = Arc::new(MockTransport::gated());
        for id in ["running", "queued", "waiting"] {
            transport.respond(id, b"pixels");
        }
        let dispatcher = bounded_dispatcher(transport.clone(), 1, 1);

        let running =
            created(dispatcher.obtain(&ResourceId::new("running"), || make("running", false)));
        dispatcher.submit(&running).unwrap();
        while running.state() != FetchState::Running {
            thread::sleep(Duration::from_millis(1));
        }
        let queued =
            created(dispatcher.obtain(&ResourceId::new("queued"), || make("queued", false)));
        dispatcher.submit(&queued).unwrap();
        let waiting =
            created(dispatcher.obtain(&ResourceId::new("waiting"), || make("waiting", false)));

        let submitted = AtomicBool::new(false);
        thread::scope(|scope| {
            scope.spawn(|| {
                dispatcher.submit(&waiting).unwrap();
                submitted.store(true, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!submitted.load(Ordering::SeqCst));
            assert_eq!(waiting.state(), FetchState::Queued);
            assert_eq!(dispatcher.queued(PoolKind::Standard), 1);

            transport.release();
        });

        assert!(submitted.load(Ordering::SeqCst));
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(transport.calls("waiting"), 1);
        assert_eq!(waiting.state(), FetchState::Completed);
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        let dispatcher = dispatcher(transport, 1);
        dispatcher.shutdown();

        let unit = created(dispatcher.obtain(&ResourceId::new("late"), || make("late", false)));
        let result = dispatcher.submit(&unit);

        assert!(matches!(result, Err(DispatchError::ShutDown)));
        assert_eq!(unit.state(), FetchState::Cancelled);
        assert!(dispatcher.wait_idle(Duration::from_millis(10)));
    }
}
