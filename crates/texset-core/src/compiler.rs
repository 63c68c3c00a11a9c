//! Turns a texture set definition plus sources into derived textures and
//! shader parameters.
//!
//! A [`Compiler`] owns one graph instance. It is built on the coordinating
//! thread, prepared there with [`Compiler::load_resources`], and then shared
//! read-only with worker threads that call
//! [`Compiler::generate_texture_source`] and
//! [`Compiler::build_parameter_data`].
//!
//! ```text
//! new ─▶ texture_data_id / compilation_required ─▶ load_resources
//!     ─▶ configure_texture ─▶ initialize_texture_source
//!     ─▶ generate_texture_source (workers) ─▶ free_texture_source
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use texset_core::compiler::{Compiler, CompilerArgs};
//! use texset_core::derived::DerivedTexture;
//! use texset_core::graph::ModuleInfo;
//! use texset_core::module::{CustomElementModule, ModuleConfig};
//! use texset_core::packing::{PackedTextureDef, PackingInfo};
//! use texset_core::source::SourceTextures;
//!
//! let modules = ModuleInfo::new(vec![ModuleConfig::CustomElement(CustomElementModule::new("Mask", 1))]);
//! let packing = PackingInfo::new(&[PackedTextureDef::new(&["Mask.r"])], &modules.processed_textures());
//! let args = CompilerArgs::new(modules, packing, Arc::new(SourceTextures::new()));
//!
//! let mut compiler = Compiler::new(Arc::new(args));
//! compiler.load_resources();
//!
//! let mut texture = DerivedTexture::new("Mask_Texture_0", None);
//! compiler.configure_texture(&mut texture, 0);
//! compiler.initialize_texture_source(&mut texture, 0);
//! compiler.generate_texture_source(&mut texture, 0).unwrap();
//! assert_eq!(texture.source.mips, 1);
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use rayon::prelude::*;

use crate::context::{AssetParams, ProcessingContext};
use crate::derived::{
    DerivedData, DerivedParameterData, DerivedTexture, DerivedTextureState, TextureKind,
    TextureSettings, TextureSource,
};
use crate::error::CompileError;
use crate::graph::{ModuleInfo, ProcessingGraph};
use crate::hash::{DataId, HashBuilder};
use crate::node::{Filter, NodeId, Operator};
use crate::packing::PackingInfo;
use crate::source::SourceProvider;
use crate::texture::{ChannelEncoding, TextureDimension, TextureFlags};
use crate::tile::{TileDescriptor, UVec3};

/// Bumped to invalidate every cached derived texture.
pub const TEXTURE_VERSION: &str = "TextureSetDerivedTexture_V0.25";

/// Bumped to invalidate every cached parameter.
pub const PARAMETER_VERSION: &str = "TextureSetParameter_V0.8";

/// Default tile edge for parallel channel writes.
pub const DEFAULT_TILE_SIZE: UVec3 = UVec3::new(128, 128, 1);

/// Immutable inputs of one compilation.
#[derive(Clone)]
pub struct CompilerArgs {
    /// Modules that build the graph.
    pub module_info: ModuleInfo,
    /// Packing of graph outputs into derived textures.
    pub packing_info: PackingInfo,
    /// Named sources.
    pub source_textures: Arc<dyn SourceProvider>,
    /// Asset-level configuration.
    pub asset_params: AssetParams,
    /// Prefix of derived texture names.
    pub name_prefix: String,
    /// Shown in log messages.
    pub debug_context: String,
    /// Folded into every id; change it to force a rebuild.
    pub user_key: String,
    /// Largest tile written by one parallel job.
    pub tile_size: UVec3,
    /// Built synchronously and always with pixels.
    pub is_default_texture_set: bool,
}

impl CompilerArgs {
    /// Arguments with an empty prefix, no user key and the default tile size.
    pub fn new(
        module_info: ModuleInfo,
        packing_info: PackingInfo,
        source_textures: Arc<dyn SourceProvider>,
    ) -> Self {
        Self {
            module_info,
            packing_info,
            source_textures,
            asset_params: AssetParams::new(),
            name_prefix: String::new(),
            debug_context: String::new(),
            user_key: String::new(),
            tile_size: DEFAULT_TILE_SIZE,
            is_default_texture_set: false,
        }
    }

    /// Sets the asset params.
    #[must_use]
    pub fn with_asset_params(mut self, asset_params: AssetParams) -> Self {
        self.asset_params = asset_params;
        self
    }

    /// Sets the derived texture name prefix.
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Sets the log context.
    #[must_use]
    pub fn with_debug_context(mut self, context: impl Into<String>) -> Self {
        self.debug_context = context.into();
        self
    }

    /// Sets the user key.
    #[must_use]
    pub fn with_user_key(mut self, key: impl Into<String>) -> Self {
        self.user_key = key.into();
        self
    }

    /// Sets the tile size. Zero components are raised to one.
    #[must_use]
    pub fn with_tile_size(mut self, tile_size: UVec3) -> Self {
        self.tile_size = tile_size.component_max(UVec3::ONE);
        self
    }

    /// Marks the set as a default texture set.
    #[must_use]
    pub fn default_texture_set(mut self, is_default: bool) -> Self {
        self.is_default_texture_set = is_default;
        self
    }

    /// Name of derived texture `index`: `{prefix}_Texture_{index}`.
    pub fn texture_name(&self, index: usize) -> String {
        format!("{}_Texture_{index}", self.name_prefix)
    }
}

impl core::fmt::Debug for CompilerArgs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompilerArgs")
            .field("modules", &self.module_info.modules.len())
            .field("packed_textures", &self.packing_info.num_textures())
            .field("name_prefix", &self.name_prefix)
            .field("user_key", &self.user_key)
            .field("tile_size", &self.tile_size)
            .field("is_default_texture_set", &self.is_default_texture_set)
            .finish_non_exhaustive()
    }
}

/// One compilation of a texture set.
pub struct Compiler {
    args: Arc<CompilerArgs>,
    graph: ProcessingGraph,
    context: ProcessingContext,
    prepared: bool,
    packed_nodes: Vec<[Option<NodeId>; 4]>,
    packed_dims: Vec<TextureDimension>,
    parameter_values: BTreeMap<String, [f32; 4]>,
    texture_ids: Vec<OnceLock<DataId>>,
    parameter_ids: BTreeMap<String, OnceLock<DataId>>,
}

impl core::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Compiler")
            .field("args", &self.args)
            .field("prepared", &self.prepared)
            .field("packed_dims", &self.packed_dims)
            .finish_non_exhaustive()
    }
}

impl Compiler {
    /// Builds the graph instance. Touches no source data.
    pub fn new(args: Arc<CompilerArgs>) -> Self {
        let graph = ProcessingGraph::new(&args.module_info.modules);
        let context = ProcessingContext::new(
            Arc::clone(&args.source_textures),
            args.asset_params.clone(),
        );
        let texture_ids = (0..args.packing_info.num_textures())
            .map(|_| OnceLock::new())
            .collect();
        let parameter_ids = graph
            .output_parameters()
            .keys()
            .map(|name| (name.clone(), OnceLock::new()))
            .collect();

        Self {
            args,
            graph,
            context,
            prepared: false,
            packed_nodes: Vec::new(),
            packed_dims: Vec::new(),
            parameter_values: BTreeMap::new(),
            texture_ids,
            parameter_ids,
        }
    }

    /// The arguments this compiler was built from.
    pub fn args(&self) -> &Arc<CompilerArgs> {
        &self.args
    }

    /// The graph instance.
    pub fn graph(&self) -> &ProcessingGraph {
        &self.graph
    }

    /// Number of derived textures.
    pub fn num_textures(&self) -> usize {
        self.args.packing_info.num_textures()
    }

    /// Output parameter names.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.graph.output_parameters().keys().map(String::as_str)
    }

    /// True once [`load_resources`](Self::load_resources) has run.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Dimension of derived texture `index`. Valid once prepared.
    pub fn texture_dimension(&self, index: usize) -> TextureDimension {
        self.packed_dims[index]
    }

    // --- ids ---

    /// Id of derived texture `index`. Memoized.
    pub fn texture_data_id(&self, index: usize) -> DataId {
        *self.texture_ids[index].get_or_init(|| self.compute_texture_data_id(index))
    }

    fn compute_texture_data_id(&self, index: usize) -> DataId {
        let packing = &self.args.packing_info;
        let info = packing.texture_info(index);
        let arena = self.graph.arena();

        let mut builder = HashBuilder::new();
        builder
            .write_str(TEXTURE_VERSION)
            .write_str(&self.args.user_key)
            .write(packing.texture_def(index));

        for (c, channel) in info.channels.iter().enumerate() {
            builder.write_usize(c);
            let node = channel
                .as_ref()
                .and_then(|ch| self.graph.output_textures().get(&ch.processed_texture));
            if let Some(&node) = node {
                arena.graph_hash(node, &mut builder);
                arena.data_hash(node, &self.context, &mut builder);
            }
        }
        builder.finish()
    }

    /// Id of parameter `name`, or `None` if the graph has no such parameter.
    pub fn parameter_data_id(&self, name: &str) -> Option<DataId> {
        let cell = self.parameter_ids.get(name)?;
        Some(*cell.get_or_init(|| self.compute_parameter_data_id(name)))
    }

    fn compute_parameter_data_id(&self, name: &str) -> DataId {
        let parameter = &self.graph.output_parameters()[name];
        let textures = self.output_nodes();
        let arena = self.graph.arena();

        let mut builder = HashBuilder::new();
        builder
            .write_str(PARAMETER_VERSION)
            .write_str(&self.args.user_key);
        parameter.graph_hash(arena, &textures, &mut builder);
        parameter.data_hash(arena, &textures, &self.context, &mut builder);
        builder.finish()
    }

    fn output_nodes(&self) -> Vec<NodeId> {
        self.graph.output_textures().values().copied().collect()
    }

    /// True when `existing` is absent or stale.
    pub fn compilation_required(&self, existing: Option<&DerivedData>) -> bool {
        let Some(existing) = existing else {
            return true;
        };
        if existing.textures.len() != self.num_textures() {
            return true;
        }
        if (0..self.num_textures()).any(|i| existing.textures[i].data.id != self.texture_data_id(i))
        {
            return true;
        }
        self.parameter_names().any(|name| {
            existing
                .parameters
                .get(name)
                .is_none_or(|data| Some(data.id) != self.parameter_data_id(name))
        })
    }

    /// True when both compilers would produce identical derived data.
    pub fn equivalent(&self, other: &Compiler) -> bool {
        if self.num_textures() != other.num_textures() {
            return false;
        }
        if (0..self.num_textures()).any(|i| self.texture_data_id(i) != other.texture_data_id(i)) {
            return false;
        }
        if self.parameter_ids.len() != other.parameter_ids.len() {
            return false;
        }
        other.parameter_names().all(|name| {
            self.parameter_ids.contains_key(name)
                && self.parameter_data_id(name) == other.parameter_data_id(name)
        })
    }

    // --- prepare ---

    /// Prepares every node and fits each derived texture's channels to one
    /// size and mip count. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics if the channels of one derived texture disagree on aspect ratio.
    pub fn load_resources(&mut self) {
        if self.prepared {
            return;
        }
        let start = Instant::now();
        let ctx = self.context.clone();

        let outputs: Vec<(String, NodeId)> = self
            .graph
            .output_textures()
            .iter()
            .map(|(name, &id)| (name.clone(), id))
            .collect();

        let arena = self.graph.arena_mut();
        let mut mipped = BTreeMap::new();
        for (name, id) in outputs {
            arena.prepare(id, &ctx);
            let dim = arena.dimension(id);
            let expected = dim.full_mip_count(arena.texture_def(id).is_volume());
            let node = if dim.mips < expected {
                let chain = arena.add(Operator::MipChain.instantiate(id));
                arena.prepare(chain, &ctx);
                chain
            } else {
                id
            };
            mipped.insert(name, node);
        }

        let packing = &self.args.packing_info;
        for info in packing.infos() {
            let channels: Vec<Option<NodeId>> = info
                .channels
                .iter()
                .take(info.channel_count)
                .map(|ch| {
                    ch.as_ref()
                        .and_then(|ch| mipped.get(&ch.processed_texture).copied())
                })
                .collect();

            let mut size = UVec3::ONE;
            let mut ratio: Option<f32> = None;
            for &node in channels.iter().flatten() {
                let dim = arena.dimension(node);
                size = size.component_max(dim.size());
                if dim.width > 1 || dim.height > 1 {
                    let r = dim.width as f32 / dim.height as f32;
                    match ratio {
                        None => ratio = Some(r),
                        Some(expected) => assert!(
                            (expected - r).abs() <= f32::EPSILON * expected.max(r),
                            "channels of one derived texture have aspect ratios {expected} and {r}"
                        ),
                    }
                }
            }

            let is_volume = !info.flags.contains(TextureFlags::ARRAY);
            let mut dim = TextureDimension::new(size.x, size.y, size.z, 1);
            dim.mips = dim.full_mip_count(is_volume);

            let mut nodes = [None; 4];
            for (c, node) in channels.into_iter().enumerate() {
                let Some(node) = node else { continue };
                let channel_mips = arena.dimension(node).mips;
                nodes[c] = Some(if channel_mips == dim.mips {
                    node
                } else {
                    let bias = channel_mips as i32 - dim.mips as i32;
                    let biased = arena.add(
                        Operator::LodBias {
                            bias,
                            filter: Filter::Nearest,
                        }
                        .instantiate(node),
                    );
                    arena.prepare(biased, &ctx);
                    biased
                });
            }

            self.packed_dims.push(dim);
            self.packed_nodes.push(nodes);
        }

        let textures = self.output_nodes();
        for (name, parameter) in self.graph.output_parameters() {
            let value = parameter.evaluate(self.graph.arena(), &textures, &ctx);
            self.parameter_values.insert(name.clone(), value);
        }

        for i in 0..self.num_textures() {
            self.texture_data_id(i);
        }
        let names: Vec<String> = self.parameter_ids.keys().cloned().collect();
        for name in &names {
            self.parameter_data_id(name);
        }

        self.prepared = true;
        tracing::debug!(
            "{}: loading resources took {:.3}s ({} nodes)",
            self.args.debug_context,
            start.elapsed().as_secs_f64(),
            self.graph.arena().len()
        );
    }

    // --- derived textures ---

    /// Applies settings and id to derived texture `index`.
    pub fn configure_texture(&self, texture: &mut DerivedTexture, index: usize) {
        let def = self.args.packing_info.texture_def(index);
        let info = self.args.packing_info.texture_info(index);

        texture.settings = TextureSettings {
            kind: if info.flags.contains(TextureFlags::ARRAY) {
                TextureKind::Texture2DArray
            } else {
                TextureKind::Texture2D
            },
            srgb: info.hardware_srgb,
            compression: def.compression,
            no_alpha: info.channel_count <= 3,
            virtual_texture_streaming: def.virtual_texture_streaming,
            lod_bias: def.lod_bias,
        };
        texture.source.id = self.texture_data_id(index);

        if texture.state < DerivedTextureState::Configured {
            texture.state = DerivedTextureState::Configured;
        }
    }

    /// Gives derived texture `index` a placeholder source of the right size.
    ///
    /// # Panics
    ///
    /// Panics if not prepared or the texture is not configured.
    pub fn initialize_texture_source(&self, texture: &mut DerivedTexture, index: usize) {
        assert!(self.prepared, "initialize_texture_source before load_resources");
        assert!(
            texture.state >= DerivedTextureState::Configured,
            "initialize_texture_source on unconfigured '{}'",
            texture.name
        );
        if texture.state >= DerivedTextureState::SourceInitialized {
            return;
        }

        let dim = self.packed_dims[index];
        let array = self.is_array(index);
        if texture.source.dimension() != dim || texture.source.array != array {
            texture.source = TextureSource::placeholder(dim, array, self.texture_data_id(index));
        }
        texture.source.id = self.texture_data_id(index);
        texture.state = DerivedTextureState::SourceInitialized;
    }

    fn is_array(&self, index: usize) -> bool {
        self.args
            .packing_info
            .texture_info(index)
            .flags
            .contains(TextureFlags::ARRAY)
    }

    /// Renders the pixels of derived texture `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Decode`] when a contributing source cannot be
    /// decoded.
    ///
    /// # Panics
    ///
    /// Panics if not prepared or the source is not initialized.
    pub fn generate_texture_source(
        &self,
        texture: &mut DerivedTexture,
        index: usize,
    ) -> Result<(), CompileError> {
        assert!(self.prepared, "generate_texture_source before load_resources");
        assert!(
            texture.state >= DerivedTextureState::SourceInitialized,
            "generate_texture_source on uninitialized '{}'",
            texture.name
        );
        if texture.state == DerivedTextureState::SourceGenerated {
            return Ok(());
        }
        if index >= self.num_textures() {
            return Err(CompileError::TextureIndex {
                index,
                count: self.num_textures(),
            });
        }

        let build_start = Instant::now();
        let mut section = Instant::now();
        let name = texture.name.clone();
        let arena = self.graph.arena();
        let info = self.args.packing_info.texture_info(index);
        let nodes = &self.packed_nodes[index];

        for node in nodes.iter().flatten() {
            arena
                .cache(*node)
                .map_err(|err| CompileError::decode(index, &name, err))?;
        }
        tracing::debug!("{name} build: caching processing graph took {:.3}s", section.elapsed().as_secs_f64());
        section = Instant::now();

        let dim = self.packed_dims[index];
        let is_volume = !self.is_array(index);
        let mip_sizes: Vec<UVec3> = (0..dim.mips).map(|m| dim.mip_size(m, is_volume)).collect();
        let mut mips: Vec<Vec<f32>> = mip_sizes.iter().map(|s| vec![0.0; s.product() * 4]).collect();
        tracing::debug!("{name} build: allocating source buffer took {:.3}s", section.elapsed().as_secs_f64());
        section = Instant::now();

        let mut restore_mul = [1.0_f32; 4];
        let mut restore_add = [0.0_f32; 4];

        for c in 0..4 {
            let mapped = match (nodes[c], &info.channels[c]) {
                (Some(node), Some(channel)) if c < info.channel_count => Some((node, channel)),
                _ => None,
            };

            let Some((node, channel)) = mapped else {
                let fill = if c < 3 { 0.0 } else { 1.0 };
                for data in &mut mips {
                    for px in data.chunks_exact_mut(4) {
                        px[c] = fill;
                    }
                }
                tracing::debug!("{name} build: filling channel {c} with blank data took {:.3}s", section.elapsed().as_secs_f64());
                section = Instant::now();
                continue;
            };

            let source_channel = channel.processed_channel as u8;
            for (m, data) in mips.iter_mut().enumerate() {
                self.write_mip(node, source_channel, c, m, mip_sizes[m], data);
            }
            tracing::debug!("{name} build: processing graph execution for channel {c} took {:.3}s", section.elapsed().as_secs_f64());
            section = Instant::now();

            if channel.encoding.contains(ChannelEncoding::RANGE_COMPRESSION) {
                let (mul, add) = range_compress(&mut mips, c);
                restore_mul[c] = mul;
                restore_add[c] = add;
                tracing::debug!("{name} build: range compression of channel {c} took {:.3}s", section.elapsed().as_secs_f64());
                section = Instant::now();
            }

            if channel.encoding.contains(ChannelEncoding::SRGB) && (!info.hardware_srgb || c >= 3) {
                mips.par_iter_mut().for_each(|data| {
                    for px in data.chunks_exact_mut(4) {
                        px[c] = px[c].powf(1.0 / 2.2);
                    }
                });
                tracing::debug!("{name} build: sRGB encoding of channel {c} took {:.3}s", section.elapsed().as_secs_f64());
                section = Instant::now();
            }
        }

        let id = self.texture_data_id(index);
        texture.source = TextureSource {
            mips_data: mips,
            ..TextureSource::placeholder(dim, !is_volume, id)
        };
        texture.data.id = id;
        texture.data.texture_parameters.clear();
        if restore_mul != [1.0; 4] || restore_add != [0.0; 4] {
            texture
                .data
                .texture_parameters
                .insert(info.range_compress_mul_name.clone(), restore_mul);
            texture
                .data
                .texture_parameters
                .insert(info.range_compress_add_name.clone(), restore_add);
        }
        texture.state = DerivedTextureState::SourceGenerated;

        tracing::debug!("{name}: texture generation took {:.3}s", build_start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Writes `channel` of `node` into packed channel `packed` of one
    /// interleaved RGBA mip, one parallel job per tile.
    fn write_mip(
        &self,
        node: NodeId,
        channel: u8,
        packed: usize,
        mip: usize,
        size: UVec3,
        data: &mut [f32],
    ) {
        let arena = self.graph.arena();
        let tile_size = self.args.tile_size;
        let tiles = size.div_ceil(tile_size);

        let rendered: Vec<(TileDescriptor, Vec<f32>)> = (0..tiles.product())
            .into_par_iter()
            .map(|t| {
                let offset = UVec3::new(
                    tile_size.x * (t % tiles.x),
                    tile_size.y * ((t / tiles.x) % tiles.y),
                    tile_size.z * (t / (tiles.x * tiles.y)),
                );
                let tile = TileDescriptor::local(size, tile_size.component_min(size - offset), offset);
                let mut local = vec![0.0; tile.pixel_count()];
                arena.write_channel(node, channel, mip, &tile, &mut local);
                (tile, local)
            })
            .collect();

        let strides = TileDescriptor::compute_data_strides(4, size);
        for (tile, local) in rendered {
            let dest = TileDescriptor::new(
                size,
                tile.tile_size,
                tile.tile_offset,
                strides,
                packed + TileDescriptor::compute_data_offset(tile.tile_offset, strides),
            );
            let mut values = local.iter();
            dest.for_each_pixel(|px| {
                if let Some(&v) = values.next() {
                    data[px.data_index] = v;
                }
            });
        }
    }

    /// Drops the pixels of a generated texture.
    ///
    /// # Panics
    ///
    /// Panics if the source is not initialized.
    pub fn free_texture_source(&self, texture: &mut DerivedTexture, index: usize) {
        assert!(
            texture.state >= DerivedTextureState::SourceInitialized,
            "free_texture_source on uninitialized '{}'",
            texture.name
        );
        if texture.state == DerivedTextureState::SourceInitialized {
            return;
        }
        texture.source.clear();
        texture.source.id = self.texture_data_id(index);
        texture.state = DerivedTextureState::SourceInitialized;
    }

    /// Value and id of parameter `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::UnknownParameter`] if the graph has no such
    /// parameter.
    pub fn build_parameter_data(&self, name: &str) -> Result<DerivedParameterData, CompileError> {
        assert!(self.prepared, "build_parameter_data before load_resources");
        let value = *self
            .parameter_values
            .get(name)
            .ok_or_else(|| CompileError::UnknownParameter(name.to_string()))?;
        let id = self
            .parameter_data_id(name)
            .ok_or_else(|| CompileError::UnknownParameter(name.to_string()))?;
        Ok(DerivedParameterData { value, id })
    }
}

/// Rescales channel `c` across every mip to 0..1 and returns the restore
/// `(mul, add)`. A constant channel gives `(0, value)` and is left as is.
fn range_compress(mips: &mut [Vec<f32>], c: usize) -> (f32, f32) {
    let (min, max) = mips
        .par_iter()
        .map(|data| {
            data.chunks_exact(4)
                .fold((f32::MAX, f32::MIN), |(lo, hi), px| (lo.min(px[c]), hi.max(px[c])))
        })
        .reduce(|| (f32::MAX, f32::MIN), |a, b| (a.0.min(b.0), a.1.max(b.1)));

    if min >= max {
        return (0.0, min);
    }

    let mul = 1.0 / (max - min);
    let add = -min * mul;
    mips.par_iter_mut().for_each(|data| {
        for px in data.chunks_exact_mut(4) {
            px[c] = px[c] * mul + add;
        }
    });
    (max - min, min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{CustomElementModule, ModuleConfig};
    use crate::packing::PackedTextureDef;
    use crate::source::{MemorySource, SourceImage, SourceTextureRef, SourceTextures};

    fn gray_source(size: UVec3, values: &[f32], content: &str) -> SourceTextureRef {
        SourceTextureRef::new(Arc::new(MemorySource::with_content_id(
            SourceImage::from_r32f(size, values),
            content,
        )))
    }

    fn element(name: &str, channels: u8, range_compression: bool) -> ModuleConfig {
        let mut module = CustomElementModule::new(name, channels);
        module.range_compression = range_compression;
        ModuleConfig::CustomElement(module)
    }

    fn args(modules: Vec<ModuleConfig>, packed: &[PackedTextureDef], sources: SourceTextures) -> CompilerArgs {
        let info = ModuleInfo::new(modules);
        let packing = PackingInfo::new(packed, &info.processed_textures());
        CompilerArgs::new(info, packing, Arc::new(sources)).with_tile_size(UVec3::new(3, 3, 1))
    }

    fn build(compiler: &Compiler, index: usize) -> DerivedTexture {
        let mut texture = DerivedTexture::new(compiler.args().texture_name(index), None);
        compiler.configure_texture(&mut texture, index);
        compiler.initialize_texture_source(&mut texture, index);
        compiler.generate_texture_source(&mut texture, index).unwrap();
        texture
    }

    // --- ids ---

    #[test]
    fn ids_are_deterministic() {
        let sources = SourceTextures::new().with("A", gray_source(UVec3::new(2, 2, 1), &[0.0; 4], "a1"));
        let packed = [PackedTextureDef::new(&["A.r"])];
        let a = Compiler::new(Arc::new(args(vec![element("A", 1, false)], &packed, sources.clone())));
        let b = Compiler::new(Arc::new(args(vec![element("A", 1, false)], &packed, sources)));
        assert_eq!(a.texture_data_id(0), b.texture_data_id(0));
        assert!(a.equivalent(&b));
    }

    #[test]
    fn source_change_changes_only_that_texture() {
        let modules = || vec![element("A", 1, false), element("B", 1, false)];
        let packed = [PackedTextureDef::new(&["A.r"]), PackedTextureDef::new(&["B.r"])];
        let size = UVec3::new(2, 2, 1);
        let before = SourceTextures::new()
            .with("A", gray_source(size, &[0.0; 4], "a1"))
            .with("B", gray_source(size, &[0.0; 4], "b1"));
        let after = SourceTextures::new()
            .with("A", gray_source(size, &[0.0; 4], "a2"))
            .with("B", gray_source(size, &[0.0; 4], "b1"));

        let x = Compiler::new(Arc::new(args(modules(), &packed, before)));
        let y = Compiler::new(Arc::new(args(modules(), &packed, after)));
        assert_ne!(x.texture_data_id(0), y.texture_data_id(0));
        assert_eq!(x.texture_data_id(1), y.texture_data_id(1));
        assert!(!x.equivalent(&y));
    }

    #[test]
    fn user_key_changes_ids() {
        let packed = [PackedTextureDef::new(&["A.r"])];
        let base = args(vec![element("A", 1, false)], &packed, SourceTextures::new());
        let keyed = base.clone().with_user_key("force");
        let a = Compiler::new(Arc::new(base));
        let b = Compiler::new(Arc::new(keyed));
        assert_ne!(a.texture_data_id(0), b.texture_data_id(0));
    }

    #[test]
    fn compilation_required_against_existing() {
        let packed = [PackedTextureDef::new(&["A.r"])];
        let mut compiler = Compiler::new(Arc::new(args(vec![element("A", 1, false)], &packed, SourceTextures::new())));
        assert!(compiler.compilation_required(None));

        compiler.load_resources();
        let data = DerivedData {
            textures: vec![build(&compiler, 0)],
            parameters: BTreeMap::new(),
        };
        assert!(!compiler.compilation_required(Some(&data)));

        let other = DerivedData::default();
        assert!(compiler.compilation_required(Some(&other)));
    }

    // --- generation ---

    #[test]
    fn unbound_source_fills_default_and_blank_channels() {
        let mut module = CustomElementModule::new("A", 1);
        module.default_value = [0.25, 0.0, 0.0, 0.0];
        let packed = [PackedTextureDef::new(&["A.r"])];
        let mut compiler = Compiler::new(Arc::new(args(
            vec![ModuleConfig::CustomElement(module)],
            &packed,
            SourceTextures::new(),
        )));
        compiler.load_resources();
        let texture = build(&compiler, 0);

        assert_eq!(texture.source.dimension(), TextureDimension::new(1, 1, 1, 1));
        assert_eq!(texture.source.pixel(0, UVec3::ZERO), Some([0.25, 0.0, 0.0, 1.0]));
        assert!(texture.data.texture_parameters.is_empty());
        assert!(texture.settings.no_alpha);
    }

    #[test]
    fn range_compression_restores_values() {
        let values = [0.2, 0.4, 0.6, 0.8];
        let sources = SourceTextures::new().with("A", gray_source(UVec3::new(2, 2, 1), &values, "a"));
        let packed = [PackedTextureDef::new(&["A.r"])];
        let mut compiler = Compiler::new(Arc::new(args(vec![element("A", 1, true)], &packed, sources)));
        compiler.load_resources();
        let texture = build(&compiler, 0);

        let mul = texture.data.texture_parameters["RangeCompress_0_Mul"][0];
        let add = texture.data.texture_parameters["RangeCompress_0_Add"][0];
        for (i, expected) in values.iter().enumerate() {
            let stored = texture.source.mips_data[0][i * 4];
            assert!((0.0..=1.0).contains(&stored));
            assert!((stored * mul + add - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn constant_channel_compresses_to_zero_mul() {
        let sources = SourceTextures::new().with("A", gray_source(UVec3::new(2, 2, 1), &[0.7; 4], "a"));
        let packed = [PackedTextureDef::new(&["A.r"])];
        let mut compiler = Compiler::new(Arc::new(args(vec![element("A", 1, true)], &packed, sources)));
        compiler.load_resources();
        let texture = build(&compiler, 0);
        assert_eq!(texture.data.texture_parameters["RangeCompress_0_Mul"][0], 0.0);
        assert!((texture.data.texture_parameters["RangeCompress_0_Add"][0] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn smaller_channel_is_enlarged_to_packed_size() {
        let big: Vec<f32> = (0..64).map(|i| i as f32 / 64.0).collect();
        let small = [0.0, 1.0, 0.5, 0.25];
        let sources = SourceTextures::new()
            .with("Big", gray_source(UVec3::new(8, 8, 1), &big, "big"))
            .with("Small", gray_source(UVec3::new(2, 2, 1), &small, "small"));
        let packed = [PackedTextureDef::new(&["Big.r", "Small.r"])];
        let mut compiler = Compiler::new(Arc::new(args(
            vec![element("Big", 1, false), element("Small", 1, false)],
            &packed,
            sources,
        )));
        compiler.load_resources();
        assert_eq!(compiler.texture_dimension(0), TextureDimension::new(8, 8, 1, 4));

        let texture = build(&compiler, 0);
        let green = |x: usize, y: usize| texture.source.mips_data[0][(y * 8 + x) * 4 + 1];
        // nearest: each small pixel covers a 4x4 block
        assert_eq!(green(0, 0), 0.0);
        assert_eq!(green(7, 0), 1.0);
        assert_eq!(green(0, 7), 0.5);
        assert_eq!(green(7, 7), 0.25);
        assert_eq!(texture.source.mips_data.len(), 4);
    }

    #[test]
    #[should_panic(expected = "aspect ratios")]
    fn mismatched_aspect_ratio_panics() {
        let sources = SourceTextures::new()
            .with("A", gray_source(UVec3::new(4, 2, 1), &[0.0; 8], "a"))
            .with("B", gray_source(UVec3::new(2, 2, 1), &[0.0; 4], "b"));
        let packed = [PackedTextureDef::new(&["A.r", "B.r"])];
        let mut compiler = Compiler::new(Arc::new(args(
            vec![element("A", 1, false), element("B", 1, false)],
            &packed,
            sources,
        )));
        compiler.load_resources();
    }

    #[test]
    fn tile_size_does_not_change_pixels() {
        let values: Vec<f32> = (0..35).map(|i| i as f32).collect();
        let sources = SourceTextures::new().with("A", gray_source(UVec3::new(7, 5, 1), &values, "a"));
        let packed = [PackedTextureDef::new(&["A.r"])];
        let base = args(vec![element("A", 1, false)], &packed, sources);

        let mut small = Compiler::new(Arc::new(base.clone().with_tile_size(UVec3::new(2, 3, 1))));
        let mut whole = Compiler::new(Arc::new(base.with_tile_size(UVec3::new(64, 64, 1))));
        small.load_resources();
        whole.load_resources();
        assert_eq!(build(&small, 0).source.mips_data, build(&whole, 0).source.mips_data);
    }

    #[test]
    fn free_returns_to_placeholder() {
        let packed = [PackedTextureDef::new(&["A.r"])];
        let mut compiler = Compiler::new(Arc::new(args(vec![element("A", 1, false)], &packed, SourceTextures::new())));
        compiler.load_resources();
        let mut texture = build(&compiler, 0);
        compiler.free_texture_source(&mut texture, 0);
        assert!(texture.source.is_placeholder());
        assert_eq!(texture.state, DerivedTextureState::SourceInitialized);
        assert_eq!(texture.source.id, compiler.texture_data_id(0));
    }

    // --- parameters ---

    #[test]
    fn parameter_data() {
        use crate::module::{HeightAssetParams, HeightModule};

        let info = ModuleInfo::new(vec![ModuleConfig::Height(HeightModule::default())]);
        let packing = PackingInfo::new(&[PackedTextureDef::new(&["Height.r"])], &info.processed_textures());
        let params = AssetParams::new().with(&HeightAssetParams {
            scale: 0.1,
            reference_plane: 0.5,
        });
        let args = CompilerArgs::new(info, packing, Arc::new(SourceTextures::new())).with_asset_params(params);
        let mut compiler = Compiler::new(Arc::new(args));
        compiler.load_resources();

        let data = compiler.build_parameter_data("HeightParams").unwrap();
        assert_eq!(data.value, [0.1, 0.5, 0.0, 0.0]);
        assert_eq!(Some(data.id), compiler.parameter_data_id("HeightParams"));
        assert!(matches!(
            compiler.build_parameter_data("Nope"),
            Err(CompileError::UnknownParameter(_))
        ));
    }
}
