//! One build of one texture set.
//!
//! A [`CompilerTask`] owns a prepared [`Compiler`] and the derived textures it
//! fills. The heavy part runs once, either inline ([`CompilerTask::start`]) or
//! on a [`WorkerPool`] ([`CompilerTask::start_async`]). Everything else runs
//! on the coordinating thread:
//!
//! ```text
//! Created ──start──▶ Running ──completion──▶ AwaitingPlatformCache ──▶ Finalized
//!                       │                                                 ▲
//!                       └──────────── cancelled or failed ────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use texset_core::{
    CompileError, Compiler, DerivedData, DerivedParameterData, DerivedTexture, DerivedTextureData,
};

use crate::cache::{BuildCache, parameter_key, texture_key};
use crate::error::BuildError;
use crate::host::{TextureRegistry, TextureSourceProvider};
use crate::pool::{JobHandle, JobState, Priority, WorkerPool};

/// Host services a task talks to.
#[derive(Clone)]
pub struct TaskServices {
    /// Derived data cache.
    pub cache: Arc<dyn BuildCache>,
    /// Host texture objects.
    pub registry: Arc<dyn TextureRegistry>,
}

impl core::fmt::Debug for TaskServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskServices").finish_non_exhaustive()
    }
}

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Textures registered, nothing built.
    Created,
    /// Build submitted or running.
    Running,
    /// Built; waiting for the host's platform data.
    AwaitingPlatformCache,
    /// Done, successfully or not.
    Finalized,
}

/// State shared with the worker running the build.
struct TaskShared {
    compiler: Compiler,
    textures: Vec<Mutex<DerivedTexture>>,
    parameters: Mutex<BTreeMap<String, DerivedParameterData>>,
    cache: Arc<dyn BuildCache>,
    cache_hits: AtomicUsize,
}

/// Build of one texture set.
pub struct CompilerTask {
    shared: Arc<TaskShared>,
    services: TaskServices,
    phase: TaskPhase,
    job: Option<JobHandle>,
    completion: Option<Receiver<Result<(), CompileError>>>,
    outcome: Option<Result<(), BuildError>>,
}

impl CompilerTask {
    /// Prepares `compiler` and registers one host texture per packed texture.
    ///
    /// # Panics
    ///
    /// Panics if the compiler rejects its inputs while loading resources
    /// (mismatched aspect ratios within one packed texture).
    pub fn new(mut compiler: Compiler, services: TaskServices) -> Self {
        compiler.load_resources();

        let textures = (0..compiler.num_textures())
            .map(|i| {
                let mut texture = DerivedTexture::new(compiler.args().texture_name(i), None);
                compiler.configure_texture(&mut texture, i);
                texture.handle = Some(
                    services
                        .registry
                        .create_or_reuse_texture(&texture.name, texture.settings.kind),
                );
                compiler.initialize_texture_source(&mut texture, i);
                Mutex::new(texture)
            })
            .collect();

        Self {
            shared: Arc::new(TaskShared {
                compiler,
                textures,
                parameters: Mutex::new(BTreeMap::new()),
                cache: Arc::clone(&services.cache),
                cache_hits: AtomicUsize::new(0),
            }),
            services,
            phase: TaskPhase::Created,
            job: None,
            completion: None,
            outcome: None,
        }
    }

    /// The task's compiler.
    pub fn compiler(&self) -> &Compiler {
        &self.shared.compiler
    }

    /// Current phase.
    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// True once finalized without error.
    pub fn succeeded(&self) -> bool {
        self.phase == TaskPhase::Finalized && matches!(self.outcome, Some(Ok(())))
    }

    fn label(&self) -> String {
        let args = self.shared.compiler.args();
        if args.debug_context.is_empty() {
            args.name_prefix.clone()
        } else {
            args.debug_context.clone()
        }
    }

    /// Builds on the calling thread.
    pub fn start(&mut self) {
        if self.phase != TaskPhase::Created {
            return;
        }
        self.phase = TaskPhase::Running;
        self.outcome = Some(execute(&self.shared).map_err(BuildError::from));
    }

    /// Submits the build to `pool`.
    pub fn start_async(&mut self, pool: &WorkerPool, priority: Priority) {
        if self.phase != TaskPhase::Created {
            return;
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        let shared = Arc::clone(&self.shared);
        let job = pool.submit(priority, move || {
            // The receiver is gone when the task was dropped mid-build.
            let _ = tx.send(execute(&shared));
        });
        self.job = Some(job);
        self.completion = Some(rx);
        self.phase = TaskPhase::Running;
    }

    /// Cancels a build that has not started. Returns false once a worker
    /// picked it up.
    pub fn cancel(&mut self) -> bool {
        let cancelled = match self.phase {
            TaskPhase::Created => true,
            TaskPhase::Running => self.job.as_ref().is_some_and(JobHandle::try_cancel),
            _ => false,
        };
        if cancelled {
            self.outcome = Some(Err(BuildError::Cancelled(self.label())));
            self.phase = TaskPhase::Finalized;
        }
        cancelled
    }

    /// Advances without blocking; true once finalized.
    pub fn try_finalize(&mut self) -> bool {
        match self.phase {
            TaskPhase::Created => return false,
            TaskPhase::Finalized => return true,
            TaskPhase::Running => {
                if !self.receive(false) {
                    return false;
                }
                if !matches!(self.outcome, Some(Ok(()))) {
                    self.phase = TaskPhase::Finalized;
                    return true;
                }
                self.begin_platform_cache();
                self.phase = TaskPhase::AwaitingPlatformCache;
            }
            TaskPhase::AwaitingPlatformCache => {}
        }
        self.advance_platform_cache()
    }

    /// Blocks until finalized. A queued build is taken back and run on the
    /// calling thread.
    pub fn finalize(&mut self) {
        if self.phase == TaskPhase::Created {
            self.start();
        }
        if self.phase == TaskPhase::Running && self.outcome.is_none() {
            if let Some(job) = &self.job {
                job.run_if_queued();
            }
            self.receive(true);
        }
        if self.try_finalize() {
            return;
        }

        for slot in &self.shared.textures {
            if let Some(handle) = slot.lock().handle {
                self.services.registry.finish_platform_cache(handle);
            }
        }
        if !self.try_finalize() {
            tracing::error!(
                "{}: platform data still pending after a forced finish",
                self.label()
            );
            self.release_sources();
            self.phase = TaskPhase::Finalized;
        }
    }

    /// Moves the result out of a finalized task.
    pub fn into_derived_data(self) -> Result<DerivedData, BuildError> {
        match self.outcome {
            Some(Ok(())) if self.phase == TaskPhase::Finalized => {}
            Some(Err(e)) => return Err(e),
            _ => return Err(BuildError::WorkerLost(self.label())),
        }
        let textures = self
            .shared
            .textures
            .iter()
            .map(|slot| std::mem::take(&mut *slot.lock()))
            .collect();
        let parameters = std::mem::take(&mut *self.shared.parameters.lock());
        Ok(DerivedData {
            textures,
            parameters,
        })
    }

    /// Takes the worker's result, if there is one. Returns false while the
    /// build is still running.
    fn receive(&mut self, block: bool) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        let Some(completion) = &self.completion else {
            return false;
        };
        let received = if block {
            completion.recv().ok()
        } else {
            match completion.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => None,
            }
        };
        self.outcome = Some(match received {
            Some(result) => result.map_err(BuildError::from),
            None if self.job.as_ref().is_some_and(|j| j.state() == JobState::Cancelled) => {
                Err(BuildError::Cancelled(self.label()))
            }
            None => Err(BuildError::WorkerLost(self.label())),
        });
        true
    }

    fn begin_platform_cache(&self) {
        let args = self.shared.compiler.args();
        for (i, slot) in self.shared.textures.iter().enumerate() {
            let texture = slot.lock();
            let Some(handle) = texture.handle else {
                continue;
            };
            let provider = (!args.is_default_texture_set)
                .then(|| TextureSourceProvider::new(Arc::clone(args), i));
            self.services
                .registry
                .begin_platform_cache(handle, &texture, provider);
        }
    }

    fn advance_platform_cache(&mut self) -> bool {
        let registry = &self.services.registry;
        let mut pending = false;
        for slot in &self.shared.textures {
            let Some(handle) = slot.lock().handle else {
                continue;
            };
            if registry.is_default_resource(handle) && registry.is_platform_cache_complete(handle) {
                registry.finish_platform_cache(handle);
            }
            pending |= registry.is_default_resource(handle);
        }
        if pending {
            return false;
        }
        self.release_sources();
        self.phase = TaskPhase::Finalized;
        true
    }

    /// Default sets keep their pixels; everything else regenerates on demand.
    fn release_sources(&self) {
        let compiler = &self.shared.compiler;
        if compiler.args().is_default_texture_set {
            return;
        }
        for (i, slot) in self.shared.textures.iter().enumerate() {
            compiler.free_texture_source(&mut slot.lock(), i);
        }
    }
}

impl core::fmt::Debug for CompilerTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompilerTask")
            .field("label", &self.label())
            .field("phase", &self.phase)
            .field("textures", &self.shared.textures.len())
            .finish()
    }
}

/// The worker body: parameters first, then every texture in parallel.
fn execute(shared: &TaskShared) -> Result<(), CompileError> {
    let start = Instant::now();
    let compiler = &shared.compiler;
    let args = compiler.args();

    let mut parameters = BTreeMap::new();
    for name in compiler.parameter_names() {
        let Some(id) = compiler.parameter_data_id(name) else {
            continue;
        };
        let key = parameter_key(&id);
        let cached = fetch::<DerivedParameterData>(&*shared.cache, &key).filter(|data| data.id == id);
        let data = match cached {
            Some(data) => {
                shared.cache_hits.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => {
                let data = compiler.build_parameter_data(name)?;
                store(&*shared.cache, &key, &data);
                data
            }
        };
        parameters.insert(name.to_string(), data);
    }
    *shared.parameters.lock() = parameters;

    shared
        .textures
        .par_iter()
        .enumerate()
        .try_for_each(|(i, slot)| {
            let mut texture = slot.lock();
            let id = compiler.texture_data_id(i);
            let key = texture_key(&id);

            // Default sets are shown before any host cache exists, so they
            // always need pixels.
            let cached = if args.is_default_texture_set {
                None
            } else {
                fetch::<DerivedTextureData>(&*shared.cache, &key).filter(|data| data.id == id)
            };
            if let Some(data) = cached {
                texture.data = data;
                shared.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }

            compiler.generate_texture_source(&mut texture, i)?;
            store(&*shared.cache, &key, &texture.data);
            Ok(())
        })?;

    tracing::info!(
        "{}: built {} textures and {} parameters in {:.3}s ({} cache hits)",
        if args.debug_context.is_empty() { &args.name_prefix } else { &args.debug_context },
        shared.textures.len(),
        shared.parameters.lock().len(),
        start.elapsed().as_secs_f64(),
        shared.cache_hits.load(Ordering::Relaxed)
    );
    Ok(())
}

fn fetch<T: DeserializeOwned>(cache: &dyn BuildCache, key: &str) -> Option<T> {
    let bytes = cache.get(key)?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("build cache: discarding unreadable entry '{key}': {e}");
            None
        }
    }
}

fn store<T: Serialize>(cache: &dyn BuildCache, key: &str, value: &T) {
    match serde_json::to_vec(value) {
        Ok(bytes) => cache.put(key, &bytes),
        Err(e) => tracing::warn!("build cache: failed to serialize '{key}': {e}"),
    }
}
