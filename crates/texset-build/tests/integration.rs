//! Integration tests for texset-build scheduling, caching and host handoff.

use std::sync::Arc;

use texset_build::{
    CollectingNotifier, CompilingManager, FileCache, GIB, ManagerConfig, MemoryCache,
    MemoryTextureRegistry, NullCache, TextureRegistry, TextureSetAsset,
};
use texset_core::{
    ChannelMask, Compiler, CompilerArgs, CustomElementModule, ElementOperator, MemorySource,
    ModuleConfig, ModuleInfo, PackedTextureDef, PackingInfo, PixelFormat, SourceImage,
    SourceTextureRef, SourceTextures, UVec3,
};

// ============================================================================
// Helpers
// ============================================================================

fn gray(size: usize, content: &str) -> SourceTextureRef {
    let values: Vec<f32> = (0..size * size).map(|i| i as f32 / (size * size) as f32).collect();
    SourceTextureRef::new(Arc::new(MemorySource::with_content_id(
        SourceImage::from_r32f(UVec3::new(size, size, 1), &values),
        content,
    )))
}

fn mask_args(prefix: &str, source: SourceTextureRef, invert: bool) -> CompilerArgs {
    let mut module = CustomElementModule::new("Mask", 1);
    if invert {
        module.operators.push(ElementOperator::Invert {
            channels: ChannelMask::R,
        });
    }
    let modules = ModuleInfo::new(vec![ModuleConfig::CustomElement(module)]);
    let packing = PackingInfo::new(
        &[PackedTextureDef::new(&["Mask.r"])],
        &modules.processed_textures(),
    );
    let sources = SourceTextures::new().with("Mask", source);
    CompilerArgs::new(modules, packing, Arc::new(sources)).with_name_prefix(prefix)
}

struct Harness {
    manager: CompilingManager,
    cache: Arc<MemoryCache>,
    registry: Arc<MemoryTextureRegistry>,
    notifier: Arc<CollectingNotifier>,
}

fn harness(config: ManagerConfig) -> Harness {
    let cache = Arc::new(MemoryCache::new());
    let registry = Arc::new(MemoryTextureRegistry::new());
    let notifier = Arc::new(CollectingNotifier::new());
    let manager = CompilingManager::new(
        config,
        cache.clone(),
        registry.clone(),
        notifier.clone(),
    )
    .unwrap();
    Harness {
        manager,
        cache,
        registry,
        notifier,
    }
}

fn drain(manager: &mut CompilingManager) {
    let mut polls = 0;
    while manager.num_remaining() > 0 {
        manager.process_pending(true);
        polls += 1;
        assert!(polls < 1_000_000, "manager never drained");
        std::thread::yield_now();
    }
}

// ============================================================================
// Single flight
// ============================================================================

#[test]
fn equivalent_double_start_builds_once() {
    let mut h = harness(ManagerConfig::default().with_worker_threads(4));
    let asset = TextureSetAsset::new("Rock", mask_args("Rock", gray(32, "rock"), false));

    h.manager.start_compilation(&asset, true);
    h.manager.start_compilation(&asset, true);
    assert!(h.manager.num_in_flight() <= 1);

    h.manager.finish_all_compilation();
    assert!(asset.is_ready());
    assert_eq!(h.cache.stats().puts, 1);
    assert_eq!(h.notifier.count(), 1);
}

#[test]
fn back_to_back_queueing_builds_latest_args() {
    let mut h = harness(ManagerConfig::default().with_worker_threads(4));
    let asset = TextureSetAsset::new("Rock", mask_args("Rock", gray(32, "v1"), false));

    h.manager.queue_compilation(&asset);
    h.manager.process_pending(false);
    assert!(h.manager.num_in_flight() <= 1);

    asset.set_args(mask_args("Rock", gray(32, "v2"), true));
    h.manager.queue_compilation(&asset);
    assert!(!asset.is_ready());
    h.manager.process_pending(false);
    assert!(h.manager.num_in_flight() <= 1);

    h.manager.finish_all_compilation();
    let data = asset.derived_data().expect("latest build published");
    let expected = Compiler::new(asset.args()).texture_data_id(0);
    assert_eq!(data.textures[0].data.id, expected);
}

// ============================================================================
// Concurrency limit
// ============================================================================

#[test]
fn memory_budget_caps_in_flight() {
    let config = ManagerConfig::default()
        .with_worker_threads(8)
        .with_available_memory(2 * GIB);
    let mut h = harness(config);

    let assets: Vec<_> = (0..5)
        .map(|i| {
            let name = format!("Set{i}");
            TextureSetAsset::new(&name, mask_args(&name, gray(64, &name), true))
        })
        .collect();
    for asset in &assets {
        h.manager.queue_compilation(asset);
    }

    let mut polls = 0;
    while h.manager.num_remaining() > 0 {
        h.manager.process_pending(true);
        assert!(h.manager.num_in_flight() <= 2);
        polls += 1;
        assert!(polls < 1_000_000);
        std::thread::yield_now();
    }
    assert!(assets.iter().all(|a| a.is_ready()));
    assert_eq!(h.notifier.count(), 5);
}

// ============================================================================
// Caching
// ============================================================================

#[test]
fn cache_hit_skips_generation() {
    let mut h = harness(ManagerConfig::default().with_worker_threads(2));
    let first = TextureSetAsset::new("A", mask_args("Shared", gray(16, "same"), true));
    h.manager.queue_compilation(&first);
    drain(&mut h.manager);
    assert_eq!(h.cache.stats().puts, 1);

    // A different asset with identical inputs reuses the entry.
    let second = TextureSetAsset::new("B", mask_args("Shared", gray(16, "same"), true));
    h.manager.queue_compilation(&second);
    drain(&mut h.manager);
    assert_eq!(h.cache.stats().puts, 1);
    assert!(h.cache.stats().hits >= 1);
    assert_eq!(
        first.derived_data().unwrap().textures[0].data,
        second.derived_data().unwrap().textures[0].data
    );

    // The host still received pixels, regenerated on demand.
    let handle = h.registry.handle_by_name("Shared_Texture_0").unwrap();
    assert!(!h.registry.is_default_resource(handle));
    let pixels = h.registry.pixels(handle).unwrap();
    assert!((pixels.pixel(0, UVec3::ZERO).unwrap()[0] - 1.0).abs() < 1e-6);
}

#[test]
fn file_cache_survives_manager_restart() {
    let dir = tempfile::tempdir().unwrap();
    let args = || mask_args("Disk", gray(16, "disk"), false);

    {
        let cache = Arc::new(FileCache::open(dir.path()).unwrap());
        let mut manager = CompilingManager::new(
            ManagerConfig::default().with_async_compilation(false),
            cache.clone(),
            Arc::new(MemoryTextureRegistry::new()),
            Arc::new(CollectingNotifier::new()),
        )
        .unwrap();
        let asset = TextureSetAsset::new("Disk", args());
        manager.start_compilation(&asset, true);
        assert!(asset.is_ready());
        assert_eq!(cache.stats().puts, 1);
    }

    let cache = Arc::new(FileCache::open(dir.path()).unwrap());
    let mut manager = CompilingManager::new(
        ManagerConfig::default().with_async_compilation(false),
        cache.clone(),
        Arc::new(MemoryTextureRegistry::new()),
        Arc::new(CollectingNotifier::new()),
    )
    .unwrap();
    let asset = TextureSetAsset::new("Disk", args());
    manager.start_compilation(&asset, true);
    assert!(asset.is_ready());
    assert_eq!(cache.stats().puts, 0);
    assert_eq!(cache.stats().hits, 1);
}

// ============================================================================
// Default texture sets
// ============================================================================

#[test]
fn default_set_builds_synchronously_with_pixels() {
    let mut h = harness(ManagerConfig::default().with_worker_threads(2));
    let asset = TextureSetAsset::new(
        "Default",
        mask_args("Default", gray(16, "default"), false).default_texture_set(true),
    );
    h.manager.queue_compilation(&asset);
    h.manager.process_pending(false);

    assert!(asset.is_ready());
    assert_eq!(h.manager.num_in_flight(), 0);
    let data = asset.derived_data().unwrap();
    assert!(!data.textures[0].source.is_placeholder());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn decode_error_leaves_asset_unset() {
    let mut h = harness(ManagerConfig::default().with_worker_threads(2));
    let broken = SourceImage {
        width: 4,
        height: 4,
        slices: 1,
        format: PixelFormat::Other(99),
        srgb: false,
        data: vec![0; 64],
    };
    let source = SourceTextureRef::new(Arc::new(MemorySource::with_content_id(broken, "broken")));
    let bad = TextureSetAsset::new("Bad", mask_args("Bad", source, false));
    let good = TextureSetAsset::new("Good", mask_args("Good", gray(8, "good"), false));

    h.manager.queue_compilation(&bad);
    h.manager.queue_compilation(&good);
    drain(&mut h.manager);

    assert!(!bad.is_ready());
    assert!(bad.last_error().is_some());
    assert!(good.is_ready());
    assert_eq!(h.notifier.names(), vec!["Good".to_string()]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn finish_compilation_blocks_on_one_asset() {
    let mut h = harness(ManagerConfig::default().with_worker_threads(2));
    let a = TextureSetAsset::new("A", mask_args("A", gray(16, "a"), false));
    let b = TextureSetAsset::new("B", mask_args("B", gray(16, "b"), false));
    h.manager.queue_compilation(&a);
    h.manager.queue_compilation(&b);

    h.manager.finish_compilation(std::slice::from_ref(&a));
    assert!(a.is_ready());
    assert!(h.manager.is_queued(&b));
}

#[test]
fn shutdown_finishes_or_cancels_in_flight() {
    let mut h = harness(ManagerConfig::default().with_worker_threads(2));
    let assets: Vec<_> = (0..3)
        .map(|i| {
            let name = format!("S{i}");
            TextureSetAsset::new(&name, mask_args(&name, gray(32, &name), false))
        })
        .collect();
    for asset in &assets {
        h.manager.start_compilation(asset, true);
    }
    h.manager.shutdown();
    assert_eq!(h.manager.num_remaining(), 0);

    // whatever was not built before shutdown builds inline now
    for asset in &assets {
        if !asset.is_ready() {
            h.manager.start_compilation(asset, true);
        }
        assert!(asset.is_ready());
    }
}

#[test]
fn registry_reuses_handles_across_builds() {
    let registry = Arc::new(MemoryTextureRegistry::new());
    let mut manager = CompilingManager::new(
        ManagerConfig::default().with_async_compilation(false),
        Arc::new(NullCache),
        registry.clone(),
        Arc::new(CollectingNotifier::new()),
    )
    .unwrap();
    let asset = TextureSetAsset::new("R", mask_args("R", gray(8, "r1"), false));
    manager.start_compilation(&asset, true);
    let handle = registry.handle_by_name("R_Texture_0").unwrap();

    asset.set_args(mask_args("R", gray(8, "r2"), false));
    manager.queue_compilation(&asset);
    manager.start_compilation(&asset, true);
    assert_eq!(registry.handle_by_name("R_Texture_0"), Some(handle));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.platform_builds(), 2);
    assert!(!registry.is_default_resource(handle));
}
