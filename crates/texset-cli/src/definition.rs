//! TOML texture set definitions.
//!
//! ```toml
//! name = "Rock"
//! user_key = "v2"
//!
//! [[modules]]
//! type = "CustomElement"
//! name = "Mask"
//! channel_count = 1
//!
//! [[packed]]
//! sources = ["Mask.r"]
//! compression = "Grayscale"
//!
//! [sources]
//! Mask = "textures/mask.png"
//!
//! [sources.Detail]
//! path = "textures/detail.png"
//! channels = "rg"
//!
//! [asset_params.HeightAssetParams]
//! scale = 0.05
//! ```
//!
//! Source paths are relative to the definition file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Deserialize;
use texset_core::{
    AssetParams, ChannelMask, CompilerArgs, ModuleConfig, ModuleInfo, PackedTextureDef,
    PackingInfo, SourceTextureRef, SourceTextures, UVec3,
};

use crate::image_source::ImageFileSource;

/// A definition file as written.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Definition {
    /// Asset name; also the derived texture prefix.
    pub name: String,
    #[serde(default)]
    pub user_key: String,
    #[serde(default)]
    pub default_texture_set: bool,
    /// Edge of the square tiles written in parallel.
    pub tile_size: Option<usize>,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    #[serde(default)]
    pub packed: Vec<PackedTextureDef>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceEntry>,
    #[serde(default)]
    pub asset_params: AssetParams,
}

/// A source given as a bare path or as a table.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SourceEntry {
    Path(PathBuf),
    Table {
        path: PathBuf,
        #[serde(default)]
        channels: Option<String>,
    },
}

impl SourceEntry {
    fn path(&self) -> &Path {
        match self {
            Self::Path(path) | Self::Table { path, .. } => path,
        }
    }

    fn mask(&self) -> anyhow::Result<ChannelMask> {
        match self {
            Self::Table {
                channels: Some(channels),
                ..
            } => parse_channel_mask(channels),
            _ => Ok(ChannelMask::ALL),
        }
    }
}

/// Parses `"rgba"`-style channel lists.
pub fn parse_channel_mask(channels: &str) -> anyhow::Result<ChannelMask> {
    let mut bits = 0;
    for c in channels.chars() {
        bits |= match c.to_ascii_lowercase() {
            'r' => ChannelMask::R.bits(),
            'g' => ChannelMask::G.bits(),
            'b' => ChannelMask::B.bits(),
            'a' => ChannelMask::A.bits(),
            other => bail!("invalid channel '{other}' in '{channels}' (expected r, g, b or a)"),
        };
    }
    if bits == 0 {
        bail!("channel list is empty");
    }
    Ok(ChannelMask::from_bits(bits))
}

/// A parsed definition plus the directory its paths are relative to.
#[derive(Debug)]
pub struct LoadedDefinition {
    pub definition: Definition,
    pub base_dir: PathBuf,
}

impl LoadedDefinition {
    /// Reads and parses `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read definition '{}'", path.display()))?;
        let definition: Definition = toml::from_str(&text)
            .with_context(|| format!("failed to parse definition '{}'", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self {
            definition,
            base_dir,
        })
    }

    pub fn module_info(&self) -> ModuleInfo {
        ModuleInfo::new(self.definition.modules.clone())
    }

    pub fn packing_info(&self, modules: &ModuleInfo) -> PackingInfo {
        PackingInfo::new(&self.definition.packed, &modules.processed_textures())
    }

    /// Binds every listed source file. Missing files are left to the
    /// compiler, which warns and uses defaults.
    pub fn source_textures(&self) -> anyhow::Result<SourceTextures> {
        let mut sources = SourceTextures::new();
        for (name, entry) in &self.definition.sources {
            let path = self.base_dir.join(entry.path());
            if !path.exists() {
                tracing::warn!("source '{name}': '{}' does not exist", path.display());
            }
            let mask = entry
                .mask()
                .with_context(|| format!("source '{name}'"))?;
            sources.insert(
                name.clone(),
                SourceTextureRef::new(Arc::new(ImageFileSource::new(path))).with_mask(mask),
            );
        }
        Ok(sources)
    }

    /// Everything the compiler needs.
    pub fn compiler_args(&self) -> anyhow::Result<CompilerArgs> {
        let modules = self.module_info();
        let packing = self.packing_info(&modules);
        let sources = self.source_textures()?;
        let def = &self.definition;

        let mut args = CompilerArgs::new(modules, packing, Arc::new(sources))
            .with_asset_params(def.asset_params.clone())
            .with_name_prefix(def.name.clone())
            .with_debug_context(def.name.clone())
            .with_user_key(def.user_key.clone())
            .default_texture_set(def.default_texture_set);
        if let Some(tile) = def.tile_size {
            if tile == 0 {
                bail!("tile_size must be at least 1");
            }
            args = args.with_tile_size(UVec3::new(tile, tile, 1));
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"
name = "Rock"
user_key = "k"

[[modules]]
type = "CustomElement"
name = "Mask"
channel_count = 1

[[packed]]
sources = ["Mask.r"]
compression = "Grayscale"

[sources]
Mask = "mask.png"

[sources.Other]
path = "other.png"
channels = "rg"

[asset_params.HeightAssetParams]
scale = 0.5
"#;

    fn loaded(text: &str) -> LoadedDefinition {
        LoadedDefinition {
            definition: toml::from_str(text).unwrap(),
            base_dir: PathBuf::from("/defs"),
        }
    }

    #[test]
    fn parses_modules_packing_and_sources() {
        let loaded = loaded(DEFINITION);
        let def = &loaded.definition;
        assert_eq!(def.name, "Rock");
        assert_eq!(def.modules.len(), 1);
        assert_eq!(def.packed[0].sources[0].as_deref(), Some("Mask.r"));
        assert!(matches!(def.sources["Mask"], SourceEntry::Path(_)));
        assert_eq!(def.sources["Other"].mask().unwrap().bits(), 0b0011);

        let modules = loaded.module_info();
        assert!(loaded.packing_info(&modules).is_valid());
    }

    #[test]
    fn builds_compiler_args() {
        let args = loaded(DEFINITION).compiler_args().unwrap();
        assert_eq!(args.texture_name(0), "Rock_Texture_0");
        assert_eq!(args.user_key, "k");
        assert!(!args.asset_params.is_empty());
    }

    #[test]
    fn rejects_bad_channels() {
        assert!(parse_channel_mask("rx").is_err());
        assert!(parse_channel_mask("").is_err());
        assert_eq!(parse_channel_mask("A").unwrap().bits(), ChannelMask::A.bits());
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(toml::from_str::<Definition>("name = \"x\"\nbogus = 1").is_err());
    }

    #[test]
    fn zero_tile_size_is_an_error() {
        let loaded = loaded("name = \"x\"\ntile_size = 0");
        assert!(loaded.compiler_args().is_err());
    }
}
