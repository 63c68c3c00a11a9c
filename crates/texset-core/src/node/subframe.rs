//! Sprite-sheet to texture-array remapping.

use super::{NodeArena, NodeId, NodeKind};
use crate::context::ProcessingContext;
use crate::hash::HashBuilder;
use crate::module::{FlipbookAssetParams, FlipbookSourceType};
use crate::texture::{TextureDef, TextureDimension, TextureFlags};
use crate::tile::{TileDescriptor, UVec3};

pub(super) const TYPE_NAME: &str = "Subframe V1";

/// Splits every source slice into a grid of frames, one array slice per frame.
///
/// Destination slice `d` reads frame `d % frames` of source slice
/// `d / frames`, where frames are numbered row-major across the sheet. An axis
/// whose source is smaller than the configured frame count is not split.
#[derive(Debug)]
pub struct SubframeNode {
    /// Upstream node.
    pub source: NodeId,
    frames: UVec3,
    frame_size: UVec3,
}

impl SubframeNode {
    /// Creates a subframe split of `source`.
    pub fn new(source: NodeId) -> Self {
        Self {
            source,
            frames: UVec3::ONE,
            frame_size: UVec3::ZERO,
        }
    }

    /// Frames per source slice.
    fn frames_per_image(&self) -> usize {
        self.frames.x * self.frames.y
    }

    pub(super) fn texture_def(&self, arena: &NodeArena) -> TextureDef {
        let mut def = arena.texture_def(self.source);
        def.flags |= TextureFlags::ARRAY;
        def
    }

    pub(super) fn data_hash(
        &self,
        arena: &NodeArena,
        ctx: &ProcessingContext,
        builder: &mut HashBuilder,
    ) {
        arena.data_hash(self.source, ctx, builder);

        let params = ctx.asset_params.get::<FlipbookAssetParams>();
        builder
            .write_u32(match params.source_type {
                FlipbookSourceType::TextureSheet => 0,
                FlipbookSourceType::TextureArray => 1,
            })
            .write_u32(params.sheet_width)
            .write_u32(params.sheet_height);
    }

    pub(super) fn write_channel(
        &self,
        arena: &NodeArena,
        channel: u8,
        mip: usize,
        tile: &TileDescriptor,
        out: &mut [f32],
    ) {
        let source_size = arena
            .dimension(self.source)
            .mip_size(mip, arena.texture_def(self.source).is_volume());
        let per_image = self.frames_per_image();

        for dest in tile.tile_offset.z..tile.tile_offset.z + tile.tile_size.z {
            let slice = dest / per_image;
            let frame = dest % per_image;
            let (fx, fy) = (frame % self.frames.x, frame / self.frames.x);

            let source_tile = TileDescriptor::new(
                source_size,
                UVec3::new(tile.tile_size.x, tile.tile_size.y, 1),
                UVec3::new(
                    fx * self.frame_size.x + tile.tile_offset.x,
                    fy * self.frame_size.y + tile.tile_offset.y,
                    slice,
                ),
                tile.data_stride,
                tile.tile_coord_to_data_index(UVec3::new(0, 0, dest - tile.tile_offset.z)),
            );
            arena.write_channel(self.source, channel, mip, &source_tile, out);
        }
    }
}

pub(super) fn prepare(
    arena: &mut NodeArena,
    id: NodeId,
    ctx: &ProcessingContext,
) -> TextureDimension {
    let NodeKind::Subframe(node) = arena.kind(id) else {
        unreachable!("subframe::prepare on non-subframe node");
    };
    let src = arena.dimension(node.source);

    let params = ctx.asset_params.get::<FlipbookAssetParams>();
    let (sheet_x, sheet_y) = match params.source_type {
        FlipbookSourceType::TextureSheet => (
            (params.sheet_width as usize).max(1),
            (params.sheet_height as usize).max(1),
        ),
        FlipbookSourceType::TextureArray => (1, 1),
    };
    let frames = UVec3::new(
        if src.width >= sheet_x { sheet_x } else { 1 },
        if src.height >= sheet_y { sheet_y } else { 1 },
        1,
    );
    let frame_size = UVec3::new(src.width / frames.x, src.height / frames.y, 1);
    let per_image = frames.x * frames.y;

    if let NodeKind::Subframe(node) = arena.kind_mut(id) {
        node.frames = frames;
        node.frame_size = frame_size;
    }

    TextureDimension::new(
        frame_size.x,
        frame_size.y,
        src.slices * per_image,
        if per_image == 1 { src.mips } else { 1 },
    )
}

#[cfg(test)]
mod tests {
    use super::super::Operator;
    use super::super::test_util::*;
    use super::*;

    fn sheet(params: FlipbookAssetParams, size: UVec3) -> (NodeArena, NodeId) {
        let values: Vec<f32> = (0..size.product()).map(|v| v as f32).collect();
        let mut ctx = context_with("A", size, &values);
        ctx.asset_params.set(&params);

        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());
        let node = arena.add(Operator::Subframe.instantiate(input));
        arena.prepare(node, &ctx);
        arena.cache(node).unwrap();
        (arena, node)
    }

    fn two_by_two() -> FlipbookAssetParams {
        FlipbookAssetParams {
            source_type: FlipbookSourceType::TextureSheet,
            sheet_width: 2,
            sheet_height: 2,
            ..FlipbookAssetParams::default()
        }
    }

    #[test]
    fn sheet_frames_become_slices() {
        let (arena, node) = sheet(two_by_two(), UVec3::new(4, 4, 1));
        assert_eq!(arena.dimension(node), TextureDimension::new(2, 2, 4, 1));
        assert!(!arena.texture_def(node).is_volume());
        assert_eq!(
            render(&arena, node, 0),
            vec![
                0.0, 1.0, 4.0, 5.0, //
                2.0, 3.0, 6.0, 7.0, //
                8.0, 9.0, 12.0, 13.0, //
                10.0, 11.0, 14.0, 15.0,
            ]
        );
    }

    #[test]
    fn source_slices_are_split_in_order() {
        let params = FlipbookAssetParams {
            sheet_height: 1,
            ..two_by_two()
        };
        let (arena, node) = sheet(params, UVec3::new(2, 1, 2));
        assert_eq!(arena.dimension(node), TextureDimension::new(1, 1, 4, 1));
        assert_eq!(render(&arena, node, 0), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn undersized_axis_is_not_split() {
        let params = FlipbookAssetParams {
            sheet_width: 8,
            ..two_by_two()
        };
        let (arena, node) = sheet(params, UVec3::new(4, 4, 1));
        assert_eq!(arena.dimension(node), TextureDimension::new(4, 2, 2, 1));
    }

    #[test]
    fn texture_array_passes_through() {
        let (arena, node) = sheet(FlipbookAssetParams::default(), UVec3::new(2, 2, 3));
        assert_eq!(arena.dimension(node), TextureDimension::new(2, 2, 3, 1));
        let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
        assert_eq!(render(&arena, node, 0), values);
    }

    #[test]
    fn sheet_layout_changes_data_hash() {
        let ctx = context_with("A", UVec3::new(4, 4, 1), &ramp(4, 4));
        let mut sheet_ctx = ctx.clone();
        sheet_ctx.asset_params.set(&two_by_two());

        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());
        let node = arena.add(Operator::Subframe.instantiate(input));
        assert_ne!(arena.data_id(node, &ctx), arena.data_id(node, &sheet_ctx));
    }
}
