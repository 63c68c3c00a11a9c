//! Scheduling of texture set builds across many assets.
//!
//! The [`CompilingManager`] is an ordinary value owned by the coordinating
//! thread. It keeps a FIFO queue of assets waiting to build and the tasks
//! currently in flight, at most one per asset. [`process_pending`] is meant
//! to be called once per frame or tick: it finalizes finished tasks, publishes
//! their data and promotes queued assets while the concurrency limit allows.
//!
//! Readers never touch the manager. Each [`TextureSetAsset`] publishes its
//! visible [`DerivedData`] through an `ArcSwapOption`, so a render thread can
//! load it at any time without locking.
//!
//! [`process_pending`]: CompilingManager::process_pending

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use texset_core::{Compiler, CompilerArgs, DerivedData};

use crate::cache::BuildCache;
use crate::config::ManagerConfig;
use crate::error::BuildError;
use crate::host::{DependentNotifier, TextureRegistry};
use crate::pool::{Priority, WorkerPool};
use crate::task::{CompilerTask, TaskServices};

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

/// A texture set definition plus its published build output.
pub struct TextureSetAsset {
    id: u64,
    name: String,
    args: RwLock<Arc<CompilerArgs>>,
    derived: ArcSwapOption<DerivedData>,
    committed: Mutex<Option<Arc<DerivedData>>>,
    last_error: Mutex<Option<String>>,
}

impl TextureSetAsset {
    /// New asset with no derived data.
    pub fn new(name: impl Into<String>, args: CompilerArgs) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            args: RwLock::new(Arc::new(args)),
            derived: ArcSwapOption::empty(),
            committed: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    /// Process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Asset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current compiler inputs.
    pub fn args(&self) -> Arc<CompilerArgs> {
        Arc::clone(&self.args.read())
    }

    /// Replaces the compiler inputs. Takes effect on the next compilation.
    pub fn set_args(&self, args: CompilerArgs) {
        *self.args.write() = Arc::new(args);
    }

    /// Published derived data, `None` while a build is pending or after a
    /// failed build.
    pub fn derived_data(&self) -> Option<Arc<DerivedData>> {
        self.derived.load_full()
    }

    /// True when derived data is published.
    pub fn is_ready(&self) -> bool {
        self.derived.load().is_some()
    }

    /// Message of the last failed build, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}

impl core::fmt::Debug for TextureSetAsset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TextureSetAsset")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}

struct InFlight {
    asset: Weak<TextureSetAsset>,
    id: u64,
    task: CompilerTask,
}

/// Queue, in-flight tasks and worker pool for texture set builds.
pub struct CompilingManager {
    config: ManagerConfig,
    services: TaskServices,
    notifier: Arc<dyn DependentNotifier>,
    pool: WorkerPool,
    queue: Vec<Weak<TextureSetAsset>>,
    in_flight: Vec<InFlight>,
    shut_down: bool,
}

impl CompilingManager {
    /// Starts the worker pool described by `config`.
    pub fn new(
        config: ManagerConfig,
        cache: Arc<dyn BuildCache>,
        registry: Arc<dyn TextureRegistry>,
        notifier: Arc<dyn DependentNotifier>,
    ) -> Result<Self, BuildError> {
        let pool = WorkerPool::new(config.worker_threads)?;
        tracing::debug!(
            "compiling manager: {} workers, up to {} builds in flight",
            pool.num_workers(),
            config.concurrency_limit()
        );
        Ok(Self {
            config,
            services: TaskServices { cache, registry },
            notifier,
            pool,
            queue: Vec::new(),
            in_flight: Vec::new(),
            shut_down: false,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // --- queries ---

    /// True while `asset` is queued or building.
    pub fn is_compiling(&self, asset: &TextureSetAsset) -> bool {
        self.is_queued(asset) || self.in_flight_position(asset.id()).is_some()
    }

    /// True while `asset` waits in the queue.
    pub fn is_queued(&self, asset: &TextureSetAsset) -> bool {
        self.queue_position(asset.id()).is_some()
    }

    /// Queued plus in-flight builds.
    pub fn num_remaining(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    /// Builds currently in flight.
    pub fn num_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn queue_position(&self, id: u64) -> Option<usize> {
        self.queue
            .iter()
            .position(|weak| weak.upgrade().is_some_and(|asset| asset.id() == id))
    }

    fn in_flight_position(&self, id: u64) -> Option<usize> {
        self.in_flight.iter().position(|entry| entry.id == id)
    }

    // --- scheduling ---

    /// Queues `asset` for a build and hides its derived data until then.
    pub fn queue_compilation(&mut self, asset: &Arc<TextureSetAsset>) {
        if self.queue_position(asset.id()).is_none() {
            self.queue.push(Arc::downgrade(asset));
        }
        asset.derived.store(None);
    }

    /// Starts building `asset` now, on the pool when `async_` allows it.
    pub fn start_compilation(&mut self, asset: &Arc<TextureSetAsset>, async_: bool) {
        if let Some(pos) = self.queue_position(asset.id()) {
            self.queue.remove(pos);
        }

        let args = asset.args();
        let compiler = Compiler::new(Arc::clone(&args));

        if let Some(pos) = self.in_flight_position(asset.id()) {
            if self.in_flight[pos].task.compiler().equivalent(&compiler) {
                if async_ {
                    return;
                }
                let mut entry = self.in_flight.remove(pos);
                entry.task.finalize();
                self.commit(asset, entry.task);
                return;
            }

            let mut stale = self.in_flight.remove(pos);
            if !stale.task.cancel() {
                stale.task.finalize();
            }
            tracing::debug!("{}: discarded a stale build", asset.name());
        }

        let committed = asset.committed.lock().clone();
        if !compiler.compilation_required(committed.as_deref()) {
            tracing::debug!("{}: derived data is up to date", asset.name());
            asset.derived.store(committed);
            self.notifier.notify(asset);
            return;
        }

        let mut task = CompilerTask::new(compiler, self.services.clone());
        let synchronous = !async_
            || args.is_default_texture_set
            || !self.config.async_compilation
            || self.shut_down;
        if synchronous {
            task.start();
            task.finalize();
            self.commit(asset, task);
        } else {
            task.start_async(&self.pool, Priority::Normal);
            self.in_flight.push(InFlight {
                asset: Arc::downgrade(asset),
                id: asset.id(),
                task,
            });
        }
    }

    /// Finalizes finished builds, then promotes queued assets.
    ///
    /// With `time_limited`, stops finalizing once `max_seconds_per_tick` has
    /// elapsed. The first in-flight task is always visited.
    pub fn process_pending(&mut self, time_limited: bool) {
        let start = Instant::now();
        let budget = Duration::from_secs_f64(self.config.max_seconds_per_tick);

        let mut finished = Vec::new();
        let mut visited = 0;
        let mut i = 0;
        while i < self.in_flight.len() {
            if time_limited && visited > 0 && start.elapsed() >= budget {
                break;
            }
            visited += 1;

            let entry = &mut self.in_flight[i];
            let orphaned = entry.asset.strong_count() == 0;
            if entry.task.try_finalize() || (orphaned && entry.task.cancel()) {
                finished.push(self.in_flight.remove(i));
            } else {
                i += 1;
            }
        }

        for entry in finished {
            match entry.asset.upgrade() {
                Some(asset) => self.commit(&asset, entry.task),
                None => tracing::debug!("dropped the build of a destroyed asset"),
            }
        }

        self.queue.retain(|weak| weak.strong_count() > 0);
        let limit = self.config.concurrency_limit();
        while self.in_flight.len() < limit && !self.queue.is_empty() {
            let weak = self.queue.remove(0);
            if let Some(asset) = weak.upgrade() {
                self.start_compilation(&asset, true);
            }
        }
    }

    /// Cancels a queued or not-yet-started build of `asset`.
    pub fn try_cancel(&mut self, asset: &TextureSetAsset) -> bool {
        if let Some(pos) = self.queue_position(asset.id()) {
            self.queue.remove(pos);
            return true;
        }
        let Some(pos) = self.in_flight_position(asset.id()) else {
            return false;
        };
        if self.in_flight[pos].task.cancel() {
            self.in_flight.remove(pos);
            true
        } else {
            false
        }
    }

    // --- blocking ---

    /// Builds `assets` to completion on the calling thread where needed.
    pub fn finish_compilation(&mut self, assets: &[Arc<TextureSetAsset>]) {
        for asset in assets {
            if self.is_queued(asset) {
                self.start_compilation(asset, false);
            } else if let Some(pos) = self.in_flight_position(asset.id()) {
                let mut entry = self.in_flight.remove(pos);
                entry.task.finalize();
                self.commit(asset, entry.task);
            }
        }
    }

    /// Starts everything queued, then waits for every build.
    pub fn finish_all_compilation(&mut self) {
        let queued: Vec<_> = self.queue.drain(..).filter_map(|weak| weak.upgrade()).collect();
        for asset in &queued {
            self.start_compilation(asset, true);
        }

        for mut entry in std::mem::take(&mut self.in_flight) {
            entry.task.finalize();
            if let Some(asset) = entry.asset.upgrade() {
                self.commit(&asset, entry.task);
            }
        }
    }

    /// Drops the queue, cancels or finishes in-flight builds and stops the
    /// worker pool. Later compilations run synchronously.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.queue.clear();
        for mut entry in std::mem::take(&mut self.in_flight) {
            if entry.task.cancel() {
                continue;
            }
            entry.task.finalize();
            if let Some(asset) = entry.asset.upgrade() {
                self.commit(&asset, entry.task);
            }
        }
        self.pool.shutdown();
        self.shut_down = true;
        tracing::debug!("compiling manager: shut down");
    }

    /// Publishes a finalized task's result on `asset`.
    fn commit(&self, asset: &TextureSetAsset, task: CompilerTask) {
        match task.into_derived_data() {
            Ok(data) => {
                let data = Arc::new(data);
                *asset.committed.lock() = Some(Arc::clone(&data));
                *asset.last_error.lock() = None;
                // A re-queued asset keeps its data hidden until the newer
                // build lands.
                if self.is_queued(asset) {
                    tracing::debug!("{}: build done, newer build queued", asset.name());
                    return;
                }
                asset.derived.store(Some(data));
                self.notifier.notify(asset);
                tracing::info!("{}: derived data ready", asset.name());
            }
            Err(BuildError::Cancelled(_)) => {
                tracing::debug!("{}: build cancelled", asset.name());
            }
            Err(e) => {
                tracing::error!("{}: build failed: {e}", asset.name());
                *asset.last_error.lock() = Some(e.to_string());
                asset.derived.store(None);
            }
        }
    }
}

impl Drop for CompilingManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for CompilingManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompilingManager")
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight.len())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::host::{CollectingNotifier, MemoryTextureRegistry};
    use texset_core::{
        CustomElementModule, MemorySource, ModuleConfig, ModuleInfo, PackedTextureDef,
        PackingInfo, SourceImage, SourceTextureRef, SourceTextures, UVec3,
    };

    fn args(content: &str) -> CompilerArgs {
        let size = UVec3::new(8, 8, 1);
        let values: Vec<f32> = (0..64).map(|i| i as f32 / 63.0).collect();
        let sources = SourceTextures::new().with(
            "Mask",
            SourceTextureRef::new(Arc::new(MemorySource::with_content_id(
                SourceImage::from_r32f(size, &values),
                content,
            ))),
        );
        let modules = ModuleInfo::new(vec![ModuleConfig::CustomElement(CustomElementModule::new(
            "Mask", 1,
        ))]);
        let packing = PackingInfo::new(
            &[PackedTextureDef::new(&["Mask.r"])],
            &modules.processed_textures(),
        );
        CompilerArgs::new(modules, packing, Arc::new(sources)).with_name_prefix("Mgr")
    }

    fn manager(config: ManagerConfig) -> (CompilingManager, Arc<CollectingNotifier>) {
        let notifier = Arc::new(CollectingNotifier::new());
        let manager = CompilingManager::new(
            config,
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryTextureRegistry::new()),
            notifier.clone(),
        )
        .unwrap();
        (manager, notifier)
    }

    // --- queue ---

    #[test]
    fn queue_has_no_duplicates() {
        let (mut manager, _) = manager(ManagerConfig::default().with_worker_threads(2));
        let asset = TextureSetAsset::new("A", args("a"));
        manager.queue_compilation(&asset);
        manager.queue_compilation(&asset);
        assert_eq!(manager.num_remaining(), 1);
        assert!(manager.is_queued(&asset));
        assert!(manager.is_compiling(&asset));
    }

    #[test]
    fn try_cancel_removes_queued_asset() {
        let (mut manager, _) = manager(ManagerConfig::default().with_worker_threads(2));
        let asset = TextureSetAsset::new("A", args("a"));
        manager.queue_compilation(&asset);
        assert!(manager.try_cancel(&asset));
        assert!(!manager.is_compiling(&asset));
        assert!(!manager.try_cancel(&asset));
    }

    #[test]
    fn destroyed_assets_leave_the_queue() {
        let (mut manager, _) = manager(ManagerConfig::default().with_worker_threads(2));
        let asset = TextureSetAsset::new("A", args("a"));
        manager.queue_compilation(&asset);
        drop(asset);
        manager.process_pending(false);
        assert_eq!(manager.num_remaining(), 0);
    }

    // --- synchronous paths ---

    #[test]
    fn sync_config_builds_immediately() {
        let (mut manager, notifier) =
            manager(ManagerConfig::default().with_async_compilation(false));
        let asset = TextureSetAsset::new("A", args("a"));
        manager.start_compilation(&asset, true);
        assert!(asset.is_ready());
        assert_eq!(manager.num_in_flight(), 0);
        assert_eq!(notifier.names(), vec!["A".to_string()]);
    }

    #[test]
    fn up_to_date_asset_is_restored_without_building() {
        let (mut manager, notifier) = manager(ManagerConfig::default());
        let asset = TextureSetAsset::new("A", args("a"));
        manager.start_compilation(&asset, false);
        let first = asset.derived_data().unwrap();

        manager.queue_compilation(&asset);
        assert!(!asset.is_ready());
        manager.start_compilation(&asset, true);
        assert_eq!(manager.num_in_flight(), 0);
        assert!(Arc::ptr_eq(&asset.derived_data().unwrap(), &first));
        assert_eq!(notifier.count(), 2);
    }

    // --- shutdown ---

    #[test]
    fn shutdown_then_compile_runs_inline() {
        let (mut manager, _) = manager(ManagerConfig::default().with_worker_threads(2));
        manager.shutdown();
        let asset = TextureSetAsset::new("A", args("a"));
        manager.start_compilation(&asset, true);
        assert!(asset.is_ready());
    }
}
