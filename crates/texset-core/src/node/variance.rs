//! Roughness correction from normal-map variance.
//!
//! Averaging unit normals into lower mips shortens them; the shortening
//! measures how much the surface orientation varies under one texel. The
//! variance is converted into an equivalent roughness lobe and folded into
//! the authored roughness so distant mips keep their specular breadth.

use serde::{Deserialize, Serialize};

use super::{NodeArena, NodeId, NodeKind};
use crate::context::{AssetParam, ProcessingContext};
use crate::hash::HashBuilder;
use crate::texture::TextureDimension;
use crate::tile::TileDescriptor;

pub(super) const TYPE_NAME: &str = "CombineVariance v6";

/// Asset-level switch for normal-to-roughness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalToRoughnessAssetParams {
    /// Pass the roughness through unchanged.
    pub disable_normal_to_roughness: bool,
}

impl AssetParam for NormalToRoughnessAssetParams {
    const KEY: &'static str = "NormalToRoughnessAssetParams";
}

/// Combines a roughness chain with the variance of a normal chain.
#[derive(Debug)]
pub struct VarianceCombineNode {
    /// Roughness node, one channel.
    pub source: NodeId,
    /// Normal node, three range-compressed channels.
    pub normals: NodeId,
    disabled: bool,
}

impl VarianceCombineNode {
    /// Creates a combine of `roughness` and `normals`.
    pub fn new(roughness: NodeId, normals: NodeId) -> Self {
        Self {
            source: roughness,
            normals,
            disabled: false,
        }
    }

    pub(super) fn graph_hash(&self, arena: &NodeArena, builder: &mut HashBuilder) {
        arena.graph_hash(self.source, builder);
        builder.write_str(TYPE_NAME);
        arena.graph_hash(self.normals, builder);
    }

    pub(super) fn data_hash(
        &self,
        arena: &NodeArena,
        ctx: &ProcessingContext,
        builder: &mut HashBuilder,
    ) {
        arena.data_hash(self.source, ctx, builder);
        arena.data_hash(self.normals, ctx, builder);
        builder.write_bool(
            ctx.asset_params
                .get::<NormalToRoughnessAssetParams>()
                .disable_normal_to_roughness,
        );
    }

    pub(super) fn write_channel(
        &self,
        arena: &NodeArena,
        channel: u8,
        mip: usize,
        tile: &TileDescriptor,
        out: &mut [f32],
    ) {
        arena.write_channel(self.source, channel, mip, tile, out);
        if self.disabled || mip == 0 {
            return;
        }

        let strides = TileDescriptor::compute_data_strides(3, tile.tile_size);
        let mut normals = vec![0.0; tile.pixel_count() * 3];
        for c in 0..3u8 {
            let normal_tile = TileDescriptor::new(
                tile.texture_size,
                tile.tile_size,
                tile.tile_offset,
                strides,
                usize::from(c),
            );
            arena.write_channel(self.normals, c, mip, &normal_tile, &mut normals);
        }

        tile.for_each_pixel(|ctx| {
            let i = TileDescriptor::compute_data_offset(ctx.tile_coord, strides);
            let n = [
                normals[i] * 2.0 - 1.0,
                normals[i + 1] * 2.0 - 1.0,
                normals[i + 2] * 2.0 - 1.0,
            ];
            let kappa = variance_kappa((n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt());
            let roughness = out[ctx.data_index];
            out[ctx.data_index] = (roughness.powi(4) + kappa).powf(0.25);
        });
    }
}

/// Lobe sharpness term for an averaged normal of length `r`.
///
/// Zero for unit normals. A zero-length normal is clamped to a tiny length.
#[inline]
fn variance_kappa(r: f32) -> f32 {
    if r < 1.0 {
        let r = r.max(1e-4);
        (1.0 - r * r) / (3.0 * r - r * r * r)
    } else {
        0.0
    }
}

pub(super) fn prepare(
    arena: &mut NodeArena,
    id: NodeId,
    ctx: &ProcessingContext,
) -> TextureDimension {
    let NodeKind::VarianceCombine(node) = arena.kind(id) else {
        unreachable!("variance::prepare on non-variance node");
    };
    let (roughness, normals) = (node.source, node.normals);

    let rough_def = arena.texture_def(roughness);
    let normal_def = arena.texture_def(normals);
    assert_eq!(rough_def.channel_count, 1, "roughness must have one channel");
    assert_eq!(normal_def.channel_count, 3, "normals must have three channels");
    assert_eq!(
        rough_def.flags, normal_def.flags,
        "roughness and normal flags differ"
    );

    let dimension = arena.dimension(roughness);
    assert_eq!(
        dimension,
        arena.dimension(normals),
        "roughness and normal dimensions differ"
    );

    let disabled = ctx
        .asset_params
        .get::<NormalToRoughnessAssetParams>()
        .disable_normal_to_roughness;
    if let NodeKind::VarianceCombine(node) = arena.kind_mut(id) {
        node.disabled = disabled;
    }
    dimension
}
