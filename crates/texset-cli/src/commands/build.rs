//! Texture set build command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use image::RgbaImage;
use indicatif::{ProgressBar, ProgressStyle};
use texset_build::{
    BuildCache, CompilingManager, FileCache, ManagerConfig, MemoryCache, MemoryTextureRegistry,
    NullNotifier, TextureSetAsset,
};
use texset_core::{DerivedTexture, TextureSource, UVec3};

use super::common::{definition_errors, format_vec4, load_args, print_errors};

#[derive(Args)]
pub struct BuildArgs {
    /// Definition file (TOML)
    #[arg(value_name = "DEFINITION")]
    definition: PathBuf,

    /// Output directory for PNGs and derived data
    #[arg(short, long, default_value = "texset-out")]
    out: PathBuf,

    /// Persistent build cache directory
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Scheduler config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Compile on the calling thread
    #[arg(long)]
    sync: bool,
}

pub fn run(args: BuildArgs) -> anyhow::Result<()> {
    let (loaded, compiler_args) = load_args(&args.definition)?;
    let name = loaded.definition.name.clone();

    let errors = definition_errors(&compiler_args);
    if !errors.is_empty() {
        eprintln!("{name}:");
        print_errors(&errors);
        anyhow::bail!("refusing to build: {} problem(s) in the definition", errors.len());
    }

    let mut config = match &args.config {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    };
    if args.sync {
        config = config.with_async_compilation(false);
    }
    if let Some(dir) = &args.cache {
        config = config.with_cache_dir(dir);
    }

    let cache: Arc<dyn BuildCache> = match &config.cache_dir {
        Some(dir) => Arc::new(FileCache::open(dir)?),
        None => Arc::new(MemoryCache::new()),
    };
    let registry = Arc::new(MemoryTextureRegistry::new());
    let mut manager =
        CompilingManager::new(config, cache, registry.clone(), Arc::new(NullNotifier))?;

    let asset = TextureSetAsset::new(&name, compiler_args);
    let start = Instant::now();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} [{elapsed_precise}] {msg}")?,
    );
    spinner.set_message(format!("compiling {name}"));
    spinner.enable_steady_tick(Duration::from_millis(100));

    manager.queue_compilation(&asset);
    while manager.num_remaining() > 0 {
        manager.process_pending(true);
        std::thread::sleep(Duration::from_millis(5));
    }
    manager.shutdown();
    spinner.finish_and_clear();

    let Some(data) = asset.derived_data() else {
        anyhow::bail!(
            "build of '{name}' failed: {}",
            asset.last_error().unwrap_or_else(|| "no derived data".to_string())
        );
    };
    println!(
        "Built {} in {:.2}s",
        name,
        start.elapsed().as_secs_f64()
    );

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create '{}'", args.out.display()))?;

    for texture in &data.textures {
        let pixels = texture
            .handle
            .and_then(|handle| registry.pixels(handle))
            .or_else(|| (!texture.source.is_placeholder()).then(|| texture.source.clone()));
        match pixels {
            Some(pixels) => write_texture(&args.out, texture, &pixels)?,
            None => tracing::warn!("{}: no pixels available, skipped", texture.name),
        }
    }

    let json_path = args.out.join(format!("{name}.json"));
    let json = serde_json::to_string_pretty(&*data)?;
    std::fs::write(&json_path, json)
        .with_context(|| format!("failed to write '{}'", json_path.display()))?;
    println!("  {}", json_path.display());

    let parameters = data.all_parameters();
    if !parameters.is_empty() {
        println!("\nParameters:");
        for (name, value) in parameters {
            println!("  {name:<24} {}", format_vec4(value));
        }
    }

    Ok(())
}

/// Writes mip 0 as 8-bit RGBA PNGs, one per slice.
fn write_texture(out: &Path, texture: &DerivedTexture, pixels: &TextureSource) -> anyhow::Result<()> {
    for slice in 0..pixels.slices {
        let path = if pixels.slices == 1 {
            out.join(format!("{}.png", texture.name))
        } else {
            out.join(format!("{}_{slice}.png", texture.name))
        };
        let image = slice_to_rgba8(pixels, slice)
            .with_context(|| format!("{}: pixel data is incomplete", texture.name))?;
        image
            .save(&path)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        println!(
            "  {} ({}x{}, {:?})",
            path.display(),
            pixels.width,
            pixels.height,
            texture.settings.compression
        );
    }
    Ok(())
}

/// Clamps one slice of mip 0 to 8-bit RGBA.
fn slice_to_rgba8(pixels: &TextureSource, slice: usize) -> Option<RgbaImage> {
    let mut bytes = Vec::with_capacity(pixels.width * pixels.height * 4);
    for y in 0..pixels.height {
        for x in 0..pixels.width {
            let px = pixels.pixel(0, UVec3::new(x, y, slice))?;
            bytes.extend(px.iter().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8));
        }
    }
    RgbaImage::from_raw(pixels.width as u32, pixels.height as u32, bytes)
}
