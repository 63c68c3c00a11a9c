//! Mip-level shift.
//!
//! A positive bias drops the top `bias` mips of the source. A negative bias
//! synthesizes `-bias` larger mips by upsampling mip 0 through a chain of
//! [`EnlargeNode`]s, created during prepare once the source size is known.

use super::enlarge::{self, EnlargeNode, Filter};
use super::{NodeArena, NodeId, NodeKind};
use crate::context::ProcessingContext;
use crate::hash::HashBuilder;
use crate::texture::TextureDimension;
use crate::tile::{TileDescriptor, UVec3};

pub(super) const TYPE_NAME: &str = "Lod Bias v1";

/// Shifts the mip chain of its source by `bias` levels.
#[derive(Debug)]
pub struct LodBiasNode {
    /// Upstream node.
    pub source: NodeId,
    /// Mip shift; negative enlarges.
    pub bias: i32,
    /// Filter used by the enlarge chain.
    pub filter: Filter,
    enlarged: Vec<NodeId>,
}

impl LodBiasNode {
    /// Creates a bias of `source`.
    pub fn new(source: NodeId, bias: i32, filter: Filter) -> Self {
        Self {
            source,
            bias,
            filter,
            enlarged: Vec::new(),
        }
    }

    /// Enlarge nodes at 2x, 4x, ... the source size. Empty until prepared or
    /// when `bias >= 0`.
    pub fn enlarged(&self) -> &[NodeId] {
        &self.enlarged
    }

    pub(super) fn graph_hash(&self, arena: &NodeArena, builder: &mut HashBuilder) {
        arena.graph_hash(self.source, builder);
        builder
            .write_str(TYPE_NAME)
            .write_i32(self.bias)
            .write_str(enlarge::TYPE_NAME);
        self.filter.hash_into(builder);
    }

    pub(super) fn write_channel(
        &self,
        arena: &NodeArena,
        channel: u8,
        mip: usize,
        tile: &TileDescriptor,
        out: &mut [f32],
    ) {
        let source_mip = mip as i64 + i64::from(self.bias);
        if let Ok(source_mip) = usize::try_from(source_mip) {
            arena.write_channel(self.source, channel, source_mip, tile, out);
        } else {
            let index = (-source_mip - 1) as usize;
            arena.write_channel(self.enlarged[index], channel, 0, tile, out);
        }
    }
}

pub(super) fn prepare(
    arena: &mut NodeArena,
    id: NodeId,
    ctx: &ProcessingContext,
) -> TextureDimension {
    let NodeKind::LodBias(node) = arena.kind(id) else {
        unreachable!("lod_bias::prepare on non-lod-bias node");
    };
    let (source, bias, filter) = (node.source, node.bias, node.filter);
    let needs_enlarge = bias < 0 && node.enlarged.is_empty();

    let src = arena.dimension(source);
    // A single slice is a plain 2D texture and never gains depth.
    let is_volume = arena.texture_def(source).is_volume() && src.slices > 1;

    if needs_enlarge {
        let mut enlarged = Vec::with_capacity(bias.unsigned_abs() as usize);
        for level in 1..=bias.unsigned_abs() {
            let target = UVec3::new(
                src.width << level,
                src.height << level,
                if is_volume { src.slices << level } else { src.slices },
            );
            let node = arena.add(NodeKind::Enlarge(EnlargeNode::new(source, target, filter)));
            arena.prepare(node, ctx);
            enlarged.push(node);
        }
        if let NodeKind::LodBias(node) = arena.kind_mut(id) {
            node.enlarged = enlarged;
        }
    }

    let shift = bias.unsigned_abs() as usize;
    let scale = |v: usize| {
        if bias >= 0 {
            (v >> shift).max(1)
        } else {
            v << shift
        }
    };
    let mips = (src.mips as i64 - i64::from(bias)).max(1) as usize;

    TextureDimension::new(
        scale(src.width),
        scale(src.height),
        if is_volume { scale(src.slices) } else { src.slices },
        mips,
    )
}
