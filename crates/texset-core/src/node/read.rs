//! Leaf node: resolves a named source and decodes it.

use std::sync::OnceLock;

use super::{NodeArena, NodeId, NodeKind};
use crate::context::ProcessingContext;
use crate::error::DecodeError;
use crate::hash::HashBuilder;
use crate::source::{LinearImage, SourceTextureRef, channel_swizzle};
use crate::texture::{SourceTextureDef, TextureDimension};
use crate::tile::{TileDescriptor, UVec3};

pub(super) const TYPE_NAME: &str = "TextureRead";

/// Reads one named source image.
///
/// A missing or unreadable source is not an error: the node reports a 1x1x1
/// dimension and writes `default_value` for every channel.
#[derive(Debug)]
pub struct ReadNode {
    /// Source name looked up in the provider.
    pub name: String,
    /// Processed definition and fallback value.
    pub def: SourceTextureDef,
    source: Option<SourceTextureRef>,
    image: OnceLock<Option<ReadCache>>,
}

#[derive(Debug)]
struct ReadCache {
    image: LinearImage,
    swizzle: [u8; 4],
}

impl ReadNode {
    /// Creates a read of `name`.
    pub fn new(name: &str, def: SourceTextureDef) -> Self {
        Self {
            name: name.to_string(),
            def,
            source: None,
            image: OnceLock::new(),
        }
    }

    /// Returns true once cached with decoded pixels.
    pub fn has_valid_image(&self) -> bool {
        matches!(self.image.get(), Some(Some(_)))
    }

    pub(super) fn graph_hash(&self, builder: &mut HashBuilder) {
        builder
            .write_str(TYPE_NAME)
            .write_str(&self.name)
            .write(&self.def);
    }

    pub(super) fn data_hash(&self, ctx: &ProcessingContext, builder: &mut HashBuilder) {
        if !ctx.sources.has_named_source(&self.name) {
            return;
        }
        let Some(source) = ctx.sources.named_source(&self.name) else {
            return;
        };
        if let Some(content_id) = ctx.sources.source_content_id(&source) {
            builder
                .write_str(&content_id)
                .write_u32(u32::from(source.channel_mask.bits()));
        }
    }

    pub(super) fn cache(&self, dimension: TextureDimension) -> Result<(), DecodeError> {
        let loaded = match &self.source {
            Some(source) => match source.texture.load() {
                Ok(raw) => {
                    let valid_channels = raw.format.valid_channels()?;
                    let image = raw.decode()?;
                    if image.size == dimension.size() {
                        Some(ReadCache {
                            image,
                            swizzle: channel_swizzle(
                                source.channel_mask,
                                valid_channels,
                                self.def.def.channel_count,
                            ),
                        })
                    } else {
                        tracing::warn!(
                            "source '{}' changed size from {} to {} during build, using default value",
                            self.name,
                            dimension.size(),
                            image.size
                        );
                        None
                    }
                }
                Err(err) => {
                    tracing::warn!("source '{}' unreadable, using default value: {err}", self.name);
                    None
                }
            },
            None => None,
        };

        let _ = self.image.set(loaded);
        Ok(())
    }

    pub(super) fn write_channel(
        &self,
        channel: u8,
        mip: usize,
        tile: &TileDescriptor,
        out: &mut [f32],
    ) {
        debug_assert_eq!(mip, 0, "sources provide mip 0 only");
        debug_assert!(channel < self.def.def.channel_count);

        match self.image.get() {
            Some(Some(cache)) => {
                let component = cache.swizzle[usize::from(channel)];
                tile.for_each_pixel(|ctx| {
                    let coord = tile.tile_offset + ctx.tile_coord;
                    out[ctx.data_index] = cache.image.component(coord, component);
                });
            }
            _ => {
                let value = self.def.default_value[usize::from(channel)];
                tile.for_each_pixel(|ctx| out[ctx.data_index] = value);
            }
        }
    }
}

/// Resolves the source handle and reads its size.
pub(super) fn prepare(
    arena: &mut NodeArena,
    id: NodeId,
    ctx: &ProcessingContext,
) -> TextureDimension {
    let NodeKind::Read(node) = arena.kind_mut(id) else {
        unreachable!("read::prepare on non-read node");
    };

    node.source = ctx.sources.named_source(&node.name);

    let size = match &node.source {
        Some(source) => match source.texture.dimensions() {
            Ok(size) if size.min_element() > 0 => Some(size),
            Ok(size) => {
                tracing::warn!("source '{}' is empty ({size}), using default value", node.name);
                None
            }
            Err(err) => {
                tracing::warn!("source '{}' unreadable, using default value: {err}", node.name);
                None
            }
        },
        None => {
            tracing::debug!("source '{}' not bound, using default value", node.name);
            None
        }
    };

    if size.is_none() {
        node.source = None;
    }
    let size = size.unwrap_or(UVec3::ONE);

    TextureDimension::new(size.x, size.y, size.z, 1)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_util::*;
    use super::*;
    use crate::context::AssetParams;
    use crate::source::{
        ChannelMask, MemorySource, PixelFormat, SourceImage, SourceTextureRef, SourceTextures,
    };
    use crate::texture::{ChannelEncoding, TextureDef};

    #[test]
    fn missing_source_fills_default() {
        let ctx = ProcessingContext::empty();
        let mut arena = NodeArena::new();
        let input = arena.add_input("Missing", gray_def());
        arena.prepare(input, &ctx);
        arena.cache(input).unwrap();

        assert_eq!(arena.dimension(input), TextureDimension::new(1, 1, 1, 1));
        assert_eq!(render(&arena, input, 0), vec![0.25]);
    }

    #[test]
    fn missing_source_contributes_no_data_hash() {
        let mut arena = NodeArena::new();
        let input = arena.add_input("Missing", gray_def());
        let empty = HashBuilder::new().finish();
        assert_eq!(arena.data_id(input, &ProcessingContext::empty()), empty);
    }

    #[test]
    fn channel_mask_changes_data_hash() {
        let image = SourceImage::from_r32f(UVec3::ONE, &[0.5]);
        let texture: Arc<dyn crate::source::SourceTexture> = Arc::new(MemorySource::new(image));
        let full = SourceTextures::new().with("A", SourceTextureRef::new(Arc::clone(&texture)));
        let masked = SourceTextures::new()
            .with("A", SourceTextureRef::new(texture).with_mask(ChannelMask::R));

        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());
        let a = ProcessingContext::new(Arc::new(full), AssetParams::new());
        let b = ProcessingContext::new(Arc::new(masked), AssetParams::new());
        assert_ne!(arena.data_id(input, &a), arena.data_id(input, &b));
    }

    #[test]
    fn masked_rgba_source_swizzles() {
        let size = UVec3::new(1, 1, 1);
        let image = SourceImage::from_rgba32f(size, &[0.1, 0.2, 0.3, 0.4]);
        let source = SourceTextureRef::new(Arc::new(MemorySource::new(image)))
            .with_mask(ChannelMask::B | ChannelMask::A);
        let ctx = ProcessingContext::new(
            Arc::new(SourceTextures::new().with("Packed", source)),
            AssetParams::new(),
        );

        let def = SourceTextureDef::new(TextureDef::new(2, ChannelEncoding::NONE), [0.0; 4]);
        let mut arena = NodeArena::new();
        let input = arena.add_input("Packed", def);
        arena.prepare(input, &ctx);
        arena.cache(input).unwrap();

        let tile = TileDescriptor::whole(size, 1, 0);
        let mut out = [0.0];
        arena.write_channel(input, 0, 0, &tile, &mut out);
        assert_eq!(out[0], 0.3);
        arena.write_channel(input, 1, 0, &tile, &mut out);
        assert_eq!(out[0], 0.4);
    }

    #[test]
    fn unsupported_format_fails_cache() {
        let image = SourceImage {
            width: 1,
            height: 1,
            slices: 1,
            format: PixelFormat::Other(99),
            srgb: false,
            data: vec![0; 4],
        };
        let source = SourceTextureRef::new(Arc::new(MemorySource::new(image)));
        let ctx = ProcessingContext::new(
            Arc::new(SourceTextures::new().with("Bad", source)),
            AssetParams::new(),
        );

        let mut arena = NodeArena::new();
        let input = arena.add_input("Bad", gray_def());
        arena.prepare(input, &ctx);
        assert!(matches!(
            arena.cache(input),
            Err(DecodeError::UnsupportedFormat(PixelFormat::Other(99)))
        ));
        // the failure is shared with later callers
        assert!(arena.cache(input).is_err());
    }

    #[test]
    fn tile_reads_offset_region() {
        let ctx = context_with("A", UVec3::new(4, 4, 1), &ramp(4, 4));
        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());
        arena.prepare(input, &ctx);
        arena.cache(input).unwrap();

        let tile = TileDescriptor::local(UVec3::new(4, 4, 1), UVec3::new(2, 2, 1), UVec3::new(2, 2, 0));
        let mut out = vec![0.0; 4];
        arena.write_channel(input, 0, 0, &tile, &mut out);
        assert_eq!(out, vec![10.0 / 16.0, 11.0 / 16.0, 14.0 / 16.0, 15.0 / 16.0]);
    }
}
