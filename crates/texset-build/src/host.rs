//! Interfaces to the host asset system.
//!
//! A build only produces [`DerivedTexture`]s. Turning them into GPU-ready
//! platform data is the host's job, driven through [`TextureRegistry`]:
//!
//! 1. [`create_or_reuse_texture`](TextureRegistry::create_or_reuse_texture)
//!    when a task is created. The texture is a default resource until its
//!    platform data is ready.
//! 2. [`begin_platform_cache`](TextureRegistry::begin_platform_cache) once
//!    the build finished. Non-default sets hand over a
//!    [`TextureSourceProvider`] instead of pixels so the host can regenerate
//!    them on demand.
//! 3. [`finish_platform_cache`](TextureRegistry::finish_platform_cache) once
//!    the host reports completion, or when a caller blocks on the result.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use texset_core::{
    CompileError, Compiler, CompilerArgs, DerivedTexture, TextureHandle, TextureKind,
    TextureSource,
};

use crate::manager::TextureSetAsset;

/// Host-side texture objects.
pub trait TextureRegistry: Send + Sync {
    /// Returns the object called `name`, creating it when missing or when
    /// its kind differs.
    fn create_or_reuse_texture(&self, name: &str, kind: TextureKind) -> TextureHandle;

    /// Starts building platform data for `texture`.
    fn begin_platform_cache(
        &self,
        handle: TextureHandle,
        texture: &DerivedTexture,
        provider: Option<TextureSourceProvider>,
    );

    /// True once platform data for `handle` can be finished without waiting.
    fn is_platform_cache_complete(&self, handle: TextureHandle) -> bool;

    /// Completes platform data for `handle`, blocking if needed.
    fn finish_platform_cache(&self, handle: TextureHandle);

    /// True while `handle` still shows the host's default texture.
    fn is_default_resource(&self, handle: TextureHandle) -> bool;
}

/// Regenerates the pixels of one derived texture on demand.
#[derive(Clone)]
pub struct TextureSourceProvider {
    args: Arc<CompilerArgs>,
    index: usize,
}

impl TextureSourceProvider {
    /// Provider for derived texture `index` of `args`.
    pub fn new(args: Arc<CompilerArgs>, index: usize) -> Self {
        Self { args, index }
    }

    /// Derived texture index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Runs a fresh compile of this texture and returns its pixels.
    pub fn generate(&self) -> Result<TextureSource, CompileError> {
        let mut compiler = Compiler::new(Arc::clone(&self.args));
        compiler.load_resources();
        let mut texture = DerivedTexture::new(self.args.texture_name(self.index), None);
        compiler.configure_texture(&mut texture, self.index);
        compiler.initialize_texture_source(&mut texture, self.index);
        compiler.generate_texture_source(&mut texture, self.index)?;
        Ok(texture.source)
    }
}

impl core::fmt::Debug for TextureSourceProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TextureSourceProvider")
            .field("texture", &self.args.texture_name(self.index))
            .finish()
    }
}

/// Told when an asset's visible derived data changes.
pub trait DependentNotifier: Send + Sync {
    /// `asset` has new derived data.
    fn notify(&self, asset: &TextureSetAsset);
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl DependentNotifier for NullNotifier {
    fn notify(&self, _asset: &TextureSetAsset) {}
}

/// Records the name of every notified asset.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    names: Mutex<Vec<String>>,
}

impl CollectingNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notified asset names, oldest first.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }

    /// Number of notifications.
    pub fn count(&self) -> usize {
        self.names.lock().len()
    }
}

impl DependentNotifier for CollectingNotifier {
    fn notify(&self, asset: &TextureSetAsset) {
        self.names.lock().push(asset.name().to_string());
    }
}

enum PlatformState {
    Default,
    Pending {
        remaining_polls: usize,
        pixels: Option<TextureSource>,
        provider: Option<TextureSourceProvider>,
    },
    Ready {
        pixels: Option<TextureSource>,
    },
}

struct Entry {
    name: String,
    kind: TextureKind,
    state: PlatformState,
}

#[derive(Default)]
struct RegistryInner {
    next_handle: u64,
    by_name: HashMap<String, TextureHandle>,
    entries: HashMap<TextureHandle, Entry>,
    platform_builds: usize,
}

/// In-process registry keeping the finished RGBA32F pixels per handle.
///
/// Platform caching completes after a configurable number of
/// [`is_platform_cache_complete`](TextureRegistry::is_platform_cache_complete)
/// polls, so callers see the same pending phase a real host shows.
#[derive(Default)]
pub struct MemoryTextureRegistry {
    inner: Mutex<RegistryInner>,
    latency_polls: usize,
}

impl MemoryTextureRegistry {
    /// Registry whose platform caches complete immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many completion polls a platform cache stays pending.
    #[must_use]
    pub fn with_latency_polls(mut self, polls: usize) -> Self {
        self.latency_polls = polls;
        self
    }

    /// Handle of the texture called `name`.
    pub fn handle_by_name(&self, name: &str) -> Option<TextureHandle> {
        self.inner.lock().by_name.get(name).copied()
    }

    /// Kind of `handle`.
    pub fn kind(&self, handle: TextureHandle) -> Option<TextureKind> {
        self.inner.lock().entries.get(&handle).map(|entry| entry.kind)
    }

    /// Finished pixels of `handle`, if its platform data is ready and a build
    /// produced them.
    pub fn pixels(&self, handle: TextureHandle) -> Option<TextureSource> {
        match &self.inner.lock().entries.get(&handle)?.state {
            PlatformState::Ready { pixels } => pixels.clone(),
            _ => None,
        }
    }

    /// Number of registered textures.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when no texture is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Number of completed platform builds.
    pub fn platform_builds(&self) -> usize {
        self.inner.lock().platform_builds
    }
}

impl TextureRegistry for MemoryTextureRegistry {
    fn create_or_reuse_texture(&self, name: &str, kind: TextureKind) -> TextureHandle {
        let mut inner = self.inner.lock();
        let existing = inner.by_name.get(name).copied();
        if let Some(handle) = existing.filter(|h| inner.entries.get(h).is_some_and(|e| e.kind == kind)) {
            return handle;
        }

        inner.next_handle += 1;
        let handle = TextureHandle(inner.next_handle);
        if let Some(old) = inner.by_name.insert(name.to_string(), handle) {
            inner.entries.remove(&old);
            tracing::debug!("registry: replaced '{name}' ({old} -> {handle}), kind changed");
        }
        inner.entries.insert(
            handle,
            Entry {
                name: name.to_string(),
                kind,
                state: PlatformState::Default,
            },
        );
        handle
    }

    fn begin_platform_cache(
        &self,
        handle: TextureHandle,
        texture: &DerivedTexture,
        provider: Option<TextureSourceProvider>,
    ) {
        let mut inner = self.inner.lock();
        let latency = self.latency_polls;
        let Some(entry) = inner.entries.get_mut(&handle) else {
            tracing::warn!("registry: begin_platform_cache on unknown {handle}");
            return;
        };
        let pixels = (!texture.source.is_placeholder()).then(|| texture.source.clone());
        entry.state = PlatformState::Pending {
            remaining_polls: latency,
            pixels,
            provider,
        };
    }

    fn is_platform_cache_complete(&self, handle: TextureHandle) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(&handle).map(|entry| &mut entry.state) {
            Some(PlatformState::Pending {
                remaining_polls, ..
            }) => {
                if *remaining_polls == 0 {
                    true
                } else {
                    *remaining_polls -= 1;
                    false
                }
            }
            Some(PlatformState::Ready { .. }) => true,
            Some(PlatformState::Default) | None => false,
        }
    }

    fn finish_platform_cache(&self, handle: TextureHandle) {
        let (name, pixels, provider) = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.entries.get_mut(&handle) else {
                return;
            };
            let state = std::mem::replace(&mut entry.state, PlatformState::Ready { pixels: None });
            match state {
                PlatformState::Pending {
                    pixels, provider, ..
                } => (entry.name.clone(), pixels, provider),
                other => {
                    entry.state = other;
                    return;
                }
            }
        };

        // Generate outside the lock; providers run a whole compile.
        let pixels = match (pixels, provider) {
            (Some(pixels), _) => Some(pixels),
            (None, Some(provider)) => match provider.generate() {
                Ok(source) => Some(source),
                Err(e) => {
                    tracing::warn!("registry: could not regenerate '{name}': {e}");
                    None
                }
            },
            (None, None) => None,
        };

        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&handle) {
            entry.state = PlatformState::Ready { pixels };
        }
        inner.platform_builds += 1;
    }

    fn is_default_resource(&self, handle: TextureHandle) -> bool {
        !matches!(
            self.inner.lock().entries.get(&handle).map(|entry| &entry.state),
            Some(PlatformState::Ready { .. })
        )
    }
}

impl core::fmt::Debug for MemoryTextureRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryTextureRegistry")
            .field("textures", &self.len())
            .field("latency_polls", &self.latency_polls)
            .finish()
    }
}
