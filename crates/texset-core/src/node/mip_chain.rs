//! Box-filtered mip generation.

use std::sync::OnceLock;

use super::{NodeArena, NodeId, NodeKind};
use crate::texture::TextureDimension;
use crate::tile::{TileDescriptor, UVec3};

pub(super) const TYPE_NAME: &str = "MipChain v1";

/// Extends its source to a complete mip chain.
///
/// Mips the source already has pass through. The rest are computed once at
/// cache time by repeated 2x2 averaging (2x2x2 for volumes), starting from the
/// source's last mip. Odd edges reuse the last row or column.
pub struct MipChainNode {
    /// Upstream node.
    pub source: NodeId,
    first_cached: usize,
    mips: usize,
    cached: OnceLock<Vec<Vec<f32>>>,
}

impl core::fmt::Debug for MipChainNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MipChainNode")
            .field("source", &self.source)
            .field("first_cached", &self.first_cached)
            .field("mips", &self.mips)
            .finish_non_exhaustive()
    }
}

impl MipChainNode {
    /// Creates a mip chain over `source`.
    pub fn new(source: NodeId) -> Self {
        Self {
            source,
            first_cached: 0,
            mips: 0,
            cached: OnceLock::new(),
        }
    }

    pub(super) fn cache(&self, arena: &NodeArena) {
        if self.first_cached >= self.mips {
            let _ = self.cached.set(Vec::new());
            return;
        }

        let def = arena.texture_def(self.source);
        let is_volume = def.is_volume();
        let channels = usize::from(def.channel_count);
        let dimension = arena.dimension(self.source);

        let base_mip = self.first_cached - 1;
        let base_size = dimension.mip_size(base_mip, is_volume);
        let mut base = vec![0.0; base_size.product() * channels];
        for channel in 0..def.channel_count {
            let tile = TileDescriptor::whole(base_size, channels, usize::from(channel));
            arena.write_channel(self.source, channel, base_mip, &tile, &mut base);
        }

        let mut levels: Vec<Vec<f32>> = Vec::with_capacity(self.mips - self.first_cached);
        let mut size = base_size;
        for mip in self.first_cached..self.mips {
            let next_size = dimension.mip_size(mip, is_volume);
            let previous = levels.last().unwrap_or(&base);
            let next = downsample(previous, size, next_size, channels, is_volume);
            levels.push(next);
            size = next_size;
        }

        tracing::debug!("mip_chain: cached {} mips below {base_size}", levels.len());
        let _ = self.cached.set(levels);
    }

    pub(super) fn write_channel(
        &self,
        arena: &NodeArena,
        channel: u8,
        mip: usize,
        tile: &TileDescriptor,
        out: &mut [f32],
    ) {
        if mip < self.first_cached {
            arena.write_channel(self.source, channel, mip, tile, out);
            return;
        }

        let Some(levels) = self.cached.get() else {
            unreachable!("mip chain written before cache");
        };
        let data = &levels[mip - self.first_cached];
        let def = arena.texture_def(self.source);
        let channels = usize::from(def.channel_count);
        let size = arena.dimension(self.source).mip_size(mip, def.is_volume());
        let channel = usize::from(channel);

        tile.for_each_pixel(|ctx| {
            let c = tile.tile_offset + ctx.tile_coord;
            let pixel = (c.z * size.y + c.y) * size.x + c.x;
            out[ctx.data_index] = data[pixel * channels + channel];
        });
    }
}

/// Averages 2x2 (or 2x2x2) blocks of an interleaved buffer.
fn downsample(
    src: &[f32],
    src_size: UVec3,
    dst_size: UVec3,
    channels: usize,
    is_volume: bool,
) -> Vec<f32> {
    let depth = if is_volume && src_size.z > 1 { 2 } else { 1 };
    let last = src_size - UVec3::ONE;
    let mut dst = vec![0.0; dst_size.product() * channels];

    for z in 0..dst_size.z {
        for y in 0..dst_size.y {
            for x in 0..dst_size.x {
                let base = if is_volume {
                    UVec3::new(x * 2, y * 2, z * 2)
                } else {
                    UVec3::new(x * 2, y * 2, z)
                };
                let out = ((z * dst_size.y + y) * dst_size.x + x) * channels;

                let mut count = 0.0;
                for dz in 0..depth {
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let s = (base + UVec3::new(dx, dy, dz)).component_min(last);
                            let i = ((s.z * src_size.y + s.y) * src_size.x + s.x) * channels;
                            for c in 0..channels {
                                dst[out + c] += src[i + c];
                            }
                            count += 1.0;
                        }
                    }
                }
                for c in 0..channels {
                    dst[out + c] /= count;
                }
            }
        }
    }
    dst
}

pub(super) fn prepare(arena: &mut NodeArena, id: NodeId) -> TextureDimension {
    let NodeKind::MipChain(node) = arena.kind(id) else {
        unreachable!("mip_chain::prepare on non-mip-chain node");
    };
    let source = node.source;
    let src = arena.dimension(source);
    let mips = src.full_mip_count(arena.texture_def(source).is_volume());

    if let NodeKind::MipChain(node) = arena.kind_mut(id) {
        node.first_cached = src.mips;
        node.mips = mips;
    }
    TextureDimension { mips, ..src }
}

#[cfg(test)]
mod tests {
    use super::super::Operator;
    use super::super::test_util::*;
    use super::*;

    fn chain(size: UVec3, values: &[f32]) -> (NodeArena, NodeId) {
        let ctx = context_with("A", size, values);
        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());
        let node = arena.add(Operator::MipChain.instantiate(input));
        arena.prepare(node, &ctx);
        arena.cache(node).unwrap();
        (arena, node)
    }

    // --- box filter ---

    #[test]
    fn averages_two_by_two_blocks() {
        let (arena, node) = chain(UVec3::new(4, 4, 1), &ramp(4, 4));
        assert_eq!(arena.dimension(node).mips, 3);
        assert_eq!(render(&arena, node, 0), ramp(4, 4));
        assert_eq!(
            render(&arena, node, 1),
            vec![2.5 / 16.0, 4.5 / 16.0, 10.5 / 16.0, 12.5 / 16.0]
        );
        assert_eq!(render(&arena, node, 2), vec![7.5 / 16.0]);
    }

    #[test]
    fn odd_edge_reuses_last_column() {
        let (arena, node) = chain(UVec3::new(3, 1, 1), &[0.0, 1.0, 2.0]);
        assert_eq!(arena.dimension(node).mips, 2);
        assert_eq!(render(&arena, node, 1), vec![0.5]);
    }

    #[test]
    fn volume_averages_slices() {
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let (arena, node) = chain(UVec3::new(2, 2, 2), &values);
        assert_eq!(arena.dimension(node).mips, 2);
        assert_eq!(render(&arena, node, 1), vec![3.5]);
    }

    // --- passthrough ---

    #[test]
    fn complete_source_passes_through() {
        let ctx = context_with("A", UVec3::ONE, &[0.75]);
        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());
        let node = arena.add(Operator::MipChain.instantiate(input));
        arena.prepare(node, &ctx);
        arena.cache(node).unwrap();

        assert_eq!(arena.dimension(node).mips, 1);
        assert_eq!(render(&arena, node, 0), vec![0.75]);
    }

    #[test]
    fn tile_reads_cached_region() {
        let (arena, node) = chain(UVec3::new(8, 8, 1), &ramp(8, 8));
        let whole = render(&arena, node, 1);

        let size = UVec3::new(4, 4, 1);
        let tile = TileDescriptor::local(size, UVec3::new(2, 2, 1), UVec3::new(2, 2, 0));
        let mut out = vec![0.0; 4];
        arena.write_channel(node, 0, 1, &tile, &mut out);
        assert_eq!(out, vec![whole[10], whole[11], whole[14], whole[15]]);
    }
}
