//! Request coordinator.
//!
//! Turns a consumer's level map into fetch units: reuses live units for the
//! same resource, cancels or detaches units the consumer no longer wants,
//! and shows the best tier already in memory right away.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{DecodedImage, Level, LevelMap, ResourceId};
use crate::domain::errors::FetchError;
use crate::domain::ports::{
    CacheError, ConsumerHandle, Decoder, DiskCache, MemoryCache, Transport,
};
use crate::infrastructure::config::LoaderConfig;

use super::decoder::RasterDecoder;
use super::dispatcher::{Admission, DispatchError, Dispatcher, PoolKind, PoolSizes};
use super::disk_cache::DiskImageCache;
use super::fetch_unit::{Binding, FetchUnit, Pipeline};
use super::http_transport::HttpTransport;
use super::memory_cache::LruMemoryCache;
use super::request::LoadRequest;
use super::result_sink::ResultSink;

/// Loader construction and maintenance failures.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A cache could not be opened or cleared.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The transport could not be created.
    #[error("Transport error: {0}")]
    Fetch(#[from] FetchError),

    /// The worker pools could not be started.
    #[error("Dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// What a call to [`ImageLoader::load`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// The consumer already wanted exactly these resources.
    pub unchanged: bool,
    /// Tier shown straight from the memory cache.
    pub immediate: Option<(ResourceId, Level)>,
    /// Resources that got a new fetch unit.
    pub spawned: Vec<ResourceId>,
    /// Resources joined onto a unit that was already running.
    pub reused: Vec<ResourceId>,
}

/// Point-in-time loader figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderStats {
    /// Live fetch units.
    pub pending: usize,
    /// Units waiting for a standard worker.
    pub standard_queued: usize,
    /// Units waiting for a cancellable worker.
    pub cancellable_queued: usize,
    /// Decoded images in memory.
    pub memory_entries: usize,
    /// Files in the disk cache.
    pub disk_entries: usize,
    /// Bytes in the disk cache.
    pub disk_bytes: u64,
}

impl std::fmt::Display for LoaderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Loader: {} pending ({} standard, {} cancellable queued), {} in memory, {} on disk ({} bytes)",
            self.pending,
            self.standard_queued,
            self.cancellable_queued,
            self.memory_entries,
            self.disk_entries,
            self.disk_bytes
        )
    }
}

/// Loads tiered images for consumers.
pub struct ImageLoader {
    memory: Arc<dyn MemoryCache>,
    disk: Arc<dyn DiskCache>,
    sink: Arc<ResultSink>,
    dispatcher: Dispatcher,
    config: LoaderConfig,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader over the given collaborators and starts its workers.
    ///
    /// # Errors
    /// Returns error if the worker threads cannot be started.
    pub fn new(
        config: LoaderConfig,
        memory: Arc<dyn MemoryCache>,
        disk: Arc<dyn DiskCache>,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Self, LoaderError> {
        let sink = Arc::new(ResultSink::new(
            memory.clone(),
            config.eager_retention_threshold,
        ));
        let pipeline = Pipeline {
            memory: memory.clone(),
            disk: disk.clone(),
            transport,
            decoder,
            exit_early: Arc::new(AtomicBool::new(false)),
            decode_attempts: config.decode.max_attempts.max(1),
            retry_backoff: config.decode.retry_backoff(),
        };
        let dispatcher = Dispatcher::start(
            PoolSizes {
                standard: config.workers.standard,
                cancellable: config.workers.cancellable,
                queue_capacity: config.workers.queue_capacity,
            },
            pipeline,
            sink.clone(),
        )?;

        Ok(Self {
            memory,
            disk,
            sink,
            dispatcher,
            config,
        })
    }

    /// Creates a loader with the LRU memory cache, on-disk cache, HTTP
    /// transport and raster decoder.
    ///
    /// # Errors
    /// Returns error if the disk cache, HTTP client or workers cannot be
    /// created.
    pub fn with_defaults(config: LoaderConfig) -> Result<Self, LoaderError> {
        let memory = match config.memory_cache.max_bytes {
            Some(bytes) => LruMemoryCache::with_capacity_bytes(bytes),
            None => LruMemoryCache::from_available_memory(config.memory_cache.percent),
        };
        let disk_config = &config.disk_cache;
        let disk = match &disk_config.directory {
            Some(dir) => DiskImageCache::open(dir.clone(), disk_config.max_bytes)?,
            None => DiskImageCache::open_default(
                &disk_config.dir_name,
                disk_config.max_bytes,
                disk_config.constrained_max_bytes,
            )?,
        };
        info!(dir = %disk.dir().display(), "Opened disk image cache");
        let transport = HttpTransport::new(config.network.timeout_secs)?;
        let decoder = RasterDecoder::with_max_alloc(config.decode.max_alloc_bytes);

        Self::new(
            config,
            Arc::new(memory),
            Arc::new(disk),
            Arc::new(transport),
            Arc::new(decoder),
        )
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Reconciles the request's consumer with `request` and schedules what
    /// is missing.
    ///
    /// Blocks while a pool's queue is full. Must not be called from inside
    /// a consumer or listener callback.
    pub fn load(&self, request: LoadRequest) -> LoadReport {
        let LoadRequest {
            levels,
            target_size,
            consumer,
            listener,
        } = request;
        let target_size = target_size.unwrap_or(self.config.default_target_size);
        let consumer = consumer.and_then(|handle| handle.upgrade().map(|live| (handle, live)));
        let mut report = LoadReport::default();

        let generation = match &consumer {
            Some((handle, live)) => {
                let state = live.display_state();
                if state.has_interest(&levels) {
                    trace!("Interest unchanged");
                    report.unchanged = true;
                    return report;
                }
                self.release_stale(handle, &levels);
                state.begin(levels.clone())
            }
            None => 0,
        };
        let template = Binding {
            consumer: consumer.as_ref().map(|(handle, _)| handle.clone()),
            generation,
            level: Level::PLACEHOLDER,
            listener,
        };

        let ordered = levels.by_level_desc();
        let candidate = self.best_in_memory(&ordered);

        for (id, level) in ordered {
            if level.is_placeholder()
                || candidate.as_ref().is_some_and(|(hit, _, _)| *hit == id)
            {
                continue;
            }
            let binding = Binding {
                level,
                ..template.clone()
            };
            self.schedule(id, level, target_size, binding, &mut report);
        }

        if let Some((id, level, image)) = candidate {
            if let Some((_, live)) = &consumer {
                self.sink
                    .apply(live.as_ref(), generation, &id, level, &image);
            }
            if let Some(listener) = &template.listener {
                listener.on_image_loaded(level);
            }
            report.immediate = Some((id, level));
        }

        debug!(
            requested = levels.len(),
            spawned = report.spawned.len(),
            reused = report.reused.len(),
            immediate = report.immediate.is_some(),
            "Load request reconciled"
        );
        report
    }

    /// Scans from the lowest-priority tier upward and returns the first one
    /// already decoded in memory.
    fn best_in_memory(
        &self,
        ordered: &[(ResourceId, Level)],
    ) -> Option<(ResourceId, Level, DecodedImage)> {
        ordered
            .iter()
            .filter(|(_, level)| !level.is_placeholder())
            .find_map(|(id, level)| {
                self.memory
                    .get(id)
                    .map(|image| (id.clone(), *level, image))
            })
    }

    /// Cancels or detaches units bound to `consumer` that `levels` no
    /// longer names.
    fn release_stale(&self, consumer: &ConsumerHandle, levels: &LevelMap) {
        for unit in self.dispatcher.find_by_consumer(consumer) {
            if levels.contains(unit.id()) {
                continue;
            }
            if unit.is_cancellable() {
                debug!(id = %unit.id(), "Cancelling unit no longer wanted");
                self.dispatcher.cancel(&unit);
            } else {
                debug!(id = %unit.id(), "Detaching unit no longer wanted");
                unit.detach();
            }
        }
    }

    fn schedule(
        &self,
        id: ResourceId,
        level: Level,
        target_size: u32,
        binding: Binding,
        report: &mut LoadReport,
    ) {
        let cancellable = self.config.is_cancellable(level);
        loop {
            let admission = self.dispatcher.obtain(&id, || {
                FetchUnit::new(id.clone(), level, target_size, cancellable, binding.clone())
            });
            match admission {
                Admission::Created(unit) => {
                    if let Err(e) = self.dispatcher.submit(&unit) {
                        warn!(id = %id, error = %e, "Failed to schedule image load");
                        return;
                    }
                    report.spawned.push(id);
                    return;
                }
                Admission::DuplicateSuppressed(unit) => {
                    let attached = if binding.consumer.is_some() {
                        unit.attach(binding.clone())
                    } else {
                        unit.attach_if_unbound(binding.clone())
                    };
                    if attached {
                        trace!(id = %id, "Joined running unit");
                        report.reused.push(id);
                        return;
                    }
                    trace!(id = %id, "Unit finished while joining, rescheduling");
                }
            }
        }
    }

    /// Cancels everything loading for `consumer` and resets its display
    /// bookkeeping so its next request is never treated as unchanged.
    pub fn cancel_work(&self, consumer: &ConsumerHandle) {
        for unit in self.dispatcher.find_by_consumer(consumer) {
            self.dispatcher.cancel(&unit);
        }
        if let Some(live) = consumer.upgrade() {
            live.display_state().reset();
        }
    }

    /// Cancels every unit.
    pub fn cancel_all(&self) {
        self.dispatcher.cancel_all();
    }

    /// While set, running units stop at their next checkpoint and new
    /// units finish as cancelled without doing any work.
    pub fn set_exit_tasks_early(&self, exit: bool) {
        debug!(exit = exit, "Exit-early flag changed");
        self.dispatcher.set_exit_tasks_early(exit);
    }

    /// Number of live fetch units.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Returns true if `id` has a live fetch unit.
    #[must_use]
    pub fn is_loading(&self, id: &ResourceId) -> bool {
        self.dispatcher.find_by_resource(id).is_some()
    }

    /// Blocks until every unit is terminal and its callbacks have run, or
    /// `timeout` elapses. Returns true if the loader went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.dispatcher.wait_idle(timeout)
    }

    /// Current figures.
    #[must_use]
    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            pending: self.dispatcher.pending_count(),
            standard_queued: self.dispatcher.queued(PoolKind::Standard),
            cancellable_queued: self.dispatcher.queued(PoolKind::Cancellable),
            memory_entries: self.memory.len(),
            disk_entries: self.disk.len(),
            disk_bytes: self.disk.size(),
        }
    }

    /// Empties both caches.
    ///
    /// # Errors
    /// Returns error if the disk cache cannot be cleared.
    pub fn clear_all(&self) -> Result<(), LoaderError> {
        self.memory.clear();
        self.disk.clear()?;
        info!("Cleared image caches");
        Ok(())
    }

    /// Stops the workers, cancels queued units and closes the disk cache.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
        if let Err(e) = self.disk.close() {
            warn!(error = %e, "Failed to close disk cache");
        }
        debug!("Image loader shut down");
    }
}
