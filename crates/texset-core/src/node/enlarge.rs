//! Upsampling to a target resolution.

use serde::{Deserialize, Serialize};

use super::{NodeArena, NodeId};
use crate::hash::HashBuilder;
use crate::texture::TextureDimension;
use crate::tile::{TileDescriptor, UVec3};

pub(super) const TYPE_NAME: &str = "Enlarge v2";

/// Sampling filter for synthesized pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Filter {
    /// Nearest source pixel.
    #[default]
    Nearest,
    /// Linear interpolation between neighbours; trilinear for volumes.
    Bilinear,
}

impl Filter {
    pub(super) fn hash_into(self, builder: &mut HashBuilder) {
        builder.write_u32(match self {
            Self::Nearest => 0,
            Self::Bilinear => 1,
        });
    }
}

/// Resamples mip 0 of its source to `target`.
#[derive(Debug)]
pub struct EnlargeNode {
    /// Upstream node.
    pub source: NodeId,
    /// Output size.
    pub target: UVec3,
    /// Sampling filter.
    pub filter: Filter,
}

impl EnlargeNode {
    /// Creates an enlarge of `source` to `target`.
    pub fn new(source: NodeId, target: UVec3, filter: Filter) -> Self {
        Self {
            source,
            target,
            filter,
        }
    }

    pub(super) fn graph_hash(&self, arena: &NodeArena, builder: &mut HashBuilder) {
        arena.graph_hash(self.source, builder);
        builder
            .write_str(TYPE_NAME)
            .write_usize(self.target.x)
            .write_usize(self.target.y);
        self.filter.hash_into(builder);
    }

    pub(super) fn dimension(&self, _arena: &NodeArena) -> TextureDimension {
        TextureDimension::new(self.target.x, self.target.y, self.target.z, 1)
    }

    pub(super) fn write_channel(
        &self,
        arena: &NodeArena,
        channel: u8,
        mip: usize,
        tile: &TileDescriptor,
        out: &mut [f32],
    ) {
        debug_assert_eq!(mip, 0, "enlarge produces a single mip");

        let source_size = arena.dimension(self.source).size();
        let target = self.target;
        let to_source = |p: UVec3| {
            let axis = |p: usize, src: usize, dst: usize| {
                ((p as f64 * (src as f64 / dst as f64)) as usize).min(src - 1)
            };
            UVec3::new(
                axis(p.x, source_size.x, target.x),
                axis(p.y, source_size.y, target.y),
                axis(p.z, source_size.z, target.z),
            )
        };
        let interp = |coord: usize, dst: usize, src: usize| ((coord * src) % dst) as f32 / dst as f32;

        // Read the region of the source this tile samples, plus one texel of
        // neighbourhood, into a scratch buffer. Neighbours only clamp at the
        // image edge.
        let src_offset = to_source(tile.tile_offset);
        let tile_last = tile.tile_offset + tile.tile_size - UVec3::ONE;
        let src_end = (to_source(tile_last) + UVec3::new(2, 2, 2)).component_min(source_size);
        let src_tile_size = src_end - src_offset;
        let src_tile = TileDescriptor::local(source_size, src_tile_size, src_offset);
        let mut src_data = vec![0.0; src_tile_size.product()];
        arena.write_channel(self.source, channel, 0, &src_tile, &mut src_data);

        let is_array = !arena.texture_def(self.source).is_volume();
        let linear = self.filter == Filter::Bilinear;
        let trilinear = linear && !is_array;
        let last = src_tile_size - UVec3::ONE;
        let sample = |c: UVec3| src_data[src_tile.tile_coord_to_data_index(c.component_min(last))];

        tile.for_each_pixel(|ctx| {
            let coord = ctx.tile_coord + tile.tile_offset;
            let base = (to_source(coord) - src_offset).component_min(last);

            if !linear {
                out[ctx.data_index] = sample(base);
                return;
            }

            let lerp_x = interp(coord.x, target.x, source_size.x);
            let lerp_y = interp(coord.y, target.y, source_size.y);
            let lerp_z = if trilinear {
                interp(coord.z, target.z, source_size.z)
            } else {
                0.0
            };

            // values[x][y][z]
            let mut values = [[[0.0f32; 2]; 2]; 2];
            for (x, plane) in values.iter_mut().enumerate() {
                for (y, row) in plane.iter_mut().enumerate() {
                    for (z, v) in row.iter_mut().enumerate() {
                        let z = if trilinear { z } else { 0 };
                        *v = sample(base + UVec3::new(x, y, z));
                    }
                }
            }

            if lerp_z > 0.0 {
                for plane in &mut values {
                    for row in plane.iter_mut() {
                        row[0] = lerp(row[0], row[1], lerp_z);
                    }
                }
            }
            if lerp_y > 0.0 {
                for plane in &mut values {
                    plane[0][0] = lerp(plane[0][0], plane[1][0], lerp_y);
                }
            }
            if lerp_x > 0.0 {
                values[0][0][0] = lerp(values[0][0][0], values[1][0][0], lerp_x);
            }

            out[ctx.data_index] = values[0][0][0];
        });
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
