//! `1 - x` on selected channels.

use super::{NodeArena, NodeId, NodeKind};
use crate::context::{AssetParams, ProcessingContext};
use crate::hash::HashBuilder;
use crate::source::ChannelMask;
use crate::texture::TextureDimension;
use crate::tile::TileDescriptor;

/// Asset-param switch that enables an [`InvertNode`].
///
/// The name replaces the node's type name, so toggled inverts hash apart from
/// plain ones.
#[derive(Clone, Copy, Debug)]
pub struct ParamToggle {
    /// Node type name while this toggle is attached.
    pub name: &'static str,
    /// Reads the switch from asset params.
    pub read: fn(&AssetParams) -> bool,
}

impl PartialEq for ParamToggle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Inverts `channels` of its source.
#[derive(Debug)]
pub struct InvertNode {
    /// Upstream node.
    pub source: NodeId,
    /// Channels to invert.
    pub channels: ChannelMask,
    /// Optional enabling switch.
    pub toggle: Option<ParamToggle>,
    enabled: bool,
}

impl InvertNode {
    /// Creates an invert of `source`.
    pub fn new(source: NodeId, channels: ChannelMask, toggle: Option<ParamToggle>) -> Self {
        Self {
            source,
            channels,
            toggle,
            enabled: true,
        }
    }

    pub(super) fn type_name(&self) -> &'static str {
        self.toggle.map_or("Invert", |t| t.name)
    }

    pub(super) fn graph_hash(&self, arena: &NodeArena, builder: &mut HashBuilder) {
        arena.graph_hash(self.source, builder);
        builder
            .write_str(self.type_name())
            .write_u32(u32::from(self.channels.bits()));
    }

    pub(super) fn data_hash(
        &self,
        arena: &NodeArena,
        ctx: &ProcessingContext,
        builder: &mut HashBuilder,
    ) {
        arena.data_hash(self.source, ctx, builder);
        if let Some(toggle) = self.toggle {
            builder.write_bool((toggle.read)(&ctx.asset_params));
        }
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

        if self.enabled && self.channels.has(channel) {
            tile.for_each_pixel(|ctx| out[ctx.data_index] = 1.0 - out[ctx.data_index]);
        }
    }
}

pub(super) fn prepare(
    arena: &mut NodeArena,
    id: NodeId,
    ctx: &ProcessingContext,
) -> TextureDimension {
    let NodeKind::Invert(node) = arena.kind(id) else {
        unreachable!("invert::prepare on non-invert node");
    };
    let source = node.source;
    let enabled = node.toggle.is_none_or(|t| (t.read)(&ctx.asset_params));

    if let NodeKind::Invert(node) = arena.kind_mut(id) {
        node.enabled = enabled;
    }
    arena.dimension(source)
}
