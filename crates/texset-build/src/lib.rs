//! Texset Build - caching and asynchronous scheduling of texture set builds
//!
//! `texset-core` turns one texture set definition into derived textures.
//! This crate decides when that happens and how often: results are cached by
//! content hash, builds run on a worker pool, and a manager keeps at most one
//! build per asset in flight while a host polls it once per tick.
//!
//! # Core Abstractions
//!
//! - [`CompilingManager`] - Queue, in-flight tasks, memory-aware concurrency
//! - [`TextureSetAsset`] - Compiler inputs plus lock-free published output
//! - [`CompilerTask`] - One build: worker body and platform-cache phases
//! - [`WorkerPool`] - Named threads with priorities and cancel-before-start
//! - [`BuildCache`] - Byte store keyed by `{plugin}_{version}_{id}`
//!   ([`MemoryCache`], [`FileCache`], [`NullCache`])
//! - [`TextureRegistry`] / [`DependentNotifier`] - Host interfaces
//! - [`ManagerConfig`] - TOML-backed scheduler settings
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use texset_build::{
//!     CompilingManager, ManagerConfig, MemoryCache, MemoryTextureRegistry, NullNotifier,
//!     TextureSetAsset,
//! };
//! use texset_core::{
//!     CompilerArgs, CustomElementModule, ModuleConfig, ModuleInfo, PackedTextureDef,
//!     PackingInfo, SourceTextures,
//! };
//!
//! let modules = ModuleInfo::new(vec![ModuleConfig::CustomElement(CustomElementModule::new(
//!     "Mask", 1,
//! ))]);
//! let packing = PackingInfo::new(&[PackedTextureDef::new(&["Mask.r"])], &modules.processed_textures());
//! let args = CompilerArgs::new(modules, packing, Arc::new(SourceTextures::new()))
//!     .with_name_prefix("Rock");
//!
//! let mut manager = CompilingManager::new(
//!     ManagerConfig::default().with_worker_threads(2),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(MemoryTextureRegistry::new()),
//!     Arc::new(NullNotifier),
//! )
//! .unwrap();
//!
//! let asset = TextureSetAsset::new("Rock", args);
//! manager.queue_compilation(&asset);
//! while manager.num_remaining() > 0 {
//!     manager.process_pending(true);
//! }
//! assert!(asset.is_ready());
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod host;
pub mod manager;
pub mod pool;
pub mod task;

// Re-export main types at crate root
pub use cache::{BuildCache, CacheStats, FileCache, MemoryCache, NullCache};
pub use config::{GIB, ManagerConfig};
pub use error::{BuildError, ConfigError};
pub use host::{
    CollectingNotifier, DependentNotifier, MemoryTextureRegistry, NullNotifier, TextureRegistry,
    TextureSourceProvider,
};
pub use manager::{CompilingManager, TextureSetAsset};
pub use pool::{JobHandle, JobState, Priority, WorkerPool};
pub use task::{CompilerTask, TaskPhase, TaskServices};
