//! Processing nodes and the arena that owns them.
//!
//! Every node in a [`ProcessingGraph`](crate::graph::ProcessingGraph) lives in
//! one [`NodeArena`] and refers to its upstream nodes by [`NodeId`]. The set of
//! node kinds is closed ([`NodeKind`]) and all phases dispatch through a single
//! `match`.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──prepare──▶ Prepared ──cache──▶ Cached ──write_channel (concurrent)
//! ```
//!
//! - [`NodeArena::graph_hash`] and [`NodeArena::data_hash`] are callable in any
//!   state and never touch pixel data.
//! - [`NodeArena::prepare`] runs on the coordinating thread with `&mut` access;
//!   it copies what the node needs out of the [`ProcessingContext`] and may
//!   append helper nodes (LodBias creates its Enlarge chain here). Idempotent.
//! - [`NodeArena::cache`] takes `&self` and may run on worker threads. The first
//!   caller computes while concurrent callers block on the node's lock, then
//!   observe the stored result.
//! - [`NodeArena::write_channel`] is read-only and safe to call from many tiles
//!   at once.

mod enlarge;
mod invert;
mod lod_bias;
mod mip_chain;
mod read;
mod subframe;
mod variance;

use std::sync::OnceLock;

use parking_lot::Mutex;

pub use enlarge::{EnlargeNode, Filter};
pub use invert::{InvertNode, ParamToggle};
pub use lod_bias::LodBiasNode;
pub use mip_chain::MipChainNode;
pub use read::ReadNode;
pub use subframe::SubframeNode;
pub use variance::{NormalToRoughnessAssetParams, VarianceCombineNode};

use crate::context::ProcessingContext;
use crate::error::DecodeError;
use crate::hash::{DataId, HashBuilder};
use crate::source::ChannelMask;
use crate::texture::{SourceTextureDef, TextureDef, TextureDimension};
use crate::tile::TileDescriptor;

/// Index of a node in its [`NodeArena`].
///
/// Ids are assigned sequentially and never reused within an arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Lifecycle position of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    /// Constructed; only hashing is valid.
    Created,
    /// External state copied in; dimension and definition are known.
    Prepared,
    /// Heavy data computed; `write_channel` is valid.
    Cached,
}

/// Named input: the leaf read followed by its operator chain.
#[derive(Debug)]
pub struct InputNode {
    /// Name the input was registered under.
    pub name: String,
    /// The underlying [`ReadNode`].
    pub read: NodeId,
    /// Last node of the operator chain, or `read` when there are none.
    pub last: NodeId,
}

/// The closed set of node kinds.
#[derive(Debug)]
pub enum NodeKind {
    /// Named input entry point.
    Input(InputNode),
    /// Source image reader.
    Read(ReadNode),
    /// Upsampling to a target size.
    Enlarge(EnlargeNode),
    /// `1 - x` on selected channels.
    Invert(InvertNode),
    /// Mip-level shift.
    LodBias(LodBiasNode),
    /// Box-filtered mip generation.
    MipChain(MipChainNode),
    /// Sprite-sheet to array remapping.
    Subframe(SubframeNode),
    /// Normal-variance roughness correction.
    VarianceCombine(VarianceCombineNode),
}

impl NodeKind {
    /// Stable type name folded into graph hashes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Input(_) => "TextureInput",
            Self::Read(_) => read::TYPE_NAME,
            Self::Enlarge(_) => enlarge::TYPE_NAME,
            Self::Invert(node) => node.type_name(),
            Self::LodBias(_) => lod_bias::TYPE_NAME,
            Self::MipChain(_) => mip_chain::TYPE_NAME,
            Self::Subframe(_) => subframe::TYPE_NAME,
            Self::VarianceCombine(_) => variance::TYPE_NAME,
        }
    }

    /// Upstream nodes this node reads from.
    pub fn upstream(&self) -> Vec<NodeId> {
        match self {
            Self::Input(node) => vec![node.last],
            Self::Read(_) => Vec::new(),
            Self::Enlarge(node) => vec![node.source],
            Self::Invert(node) => vec![node.source],
            Self::LodBias(node) => {
                let mut ids = vec![node.source];
                ids.extend_from_slice(node.enlarged());
                ids
            }
            Self::MipChain(node) => vec![node.source],
            Self::Subframe(node) => vec![node.source],
            Self::VarianceCombine(node) => vec![node.source, node.normals],
        }
    }
}

/// Operator applied to an input after its read, created per input when the
/// graph is generated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operator {
    /// See [`InvertNode`].
    Invert {
        /// Channels to invert.
        channels: ChannelMask,
        /// Asset-param switch; always on when `None`.
        toggle: Option<ParamToggle>,
    },
    /// See [`SubframeNode`].
    Subframe,
    /// See [`LodBiasNode`].
    LodBias {
        /// Mip shift; negative enlarges.
        bias: i32,
        /// Filter for synthesized mips.
        filter: Filter,
    },
    /// See [`MipChainNode`].
    MipChain,
}

impl Operator {
    /// Builds the node kind wrapping `source`.
    pub fn instantiate(&self, source: NodeId) -> NodeKind {
        match *self {
            Self::Invert { channels, toggle } => {
                NodeKind::Invert(InvertNode::new(source, channels, toggle))
            }
            Self::Subframe => NodeKind::Subframe(SubframeNode::new(source)),
            Self::LodBias { bias, filter } => {
                NodeKind::LodBias(LodBiasNode::new(source, bias, filter))
            }
            Self::MipChain => NodeKind::MipChain(MipChainNode::new(source)),
        }
    }
}

struct Node {
    kind: NodeKind,
    state: NodeState,
    dimension: TextureDimension,
    cache_lock: Mutex<()>,
    cached: OnceLock<Result<(), DecodeError>>,
}

/// Owner of every node in a graph.
#[derive(Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl core::fmt::Debug for NodeArena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|n| (n.kind.type_name(), n.state)))
            .finish()
    }
}

impl NodeArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a node.
    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        tracing::debug!("node_add: {} {id}", kind.type_name());
        self.nodes.push(Node {
            kind,
            state: NodeState::Created,
            dimension: TextureDimension::default(),
            cache_lock: Mutex::new(()),
            cached: OnceLock::new(),
        });
        id
    }

    /// Appends an input node and its read node.
    pub fn add_input(&mut self, name: &str, def: SourceTextureDef) -> NodeId {
        let read = self.add(NodeKind::Read(ReadNode::new(name, def)));
        self.add(NodeKind::Input(InputNode {
            name: name.to_string(),
            read,
            last: read,
        }))
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// The kind of node `id`.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub(crate) fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.node_mut(id).kind
    }

    /// Current lifecycle state.
    pub fn state(&self, id: NodeId) -> NodeState {
        let node = self.node(id);
        if node.cached.get().is_some() {
            NodeState::Cached
        } else {
            node.state
        }
    }

    /// Processed texture definition produced by `id`.
    pub fn texture_def(&self, id: NodeId) -> TextureDef {
        match &self.node(id).kind {
            NodeKind::Input(node) => self.texture_def(node.last),
            NodeKind::Read(node) => node.def.def,
            NodeKind::Subframe(node) => node.texture_def(self),
            NodeKind::Enlarge(node) => self.texture_def(node.source),
            NodeKind::Invert(node) => self.texture_def(node.source),
            NodeKind::LodBias(node) => self.texture_def(node.source),
            NodeKind::MipChain(node) => self.texture_def(node.source),
            NodeKind::VarianceCombine(node) => self.texture_def(node.source),
        }
    }

    /// Dimension of `id`. Valid once prepared.
    pub fn dimension(&self, id: NodeId) -> TextureDimension {
        let node = self.node(id);
        debug_assert!(
            node.state >= NodeState::Prepared,
            "dimension of unprepared {id}"
        );
        node.dimension
    }

    // --- hashing ---

    /// Folds the structure of `id` and everything upstream into `builder`.
    pub fn graph_hash(&self, id: NodeId, builder: &mut HashBuilder) {
        let kind = &self.node(id).kind;
        match kind {
            NodeKind::Input(node) => {
                builder.write_str(kind.type_name());
                self.graph_hash(node.last, builder);
            }
            NodeKind::Read(node) => node.graph_hash(builder),
            NodeKind::Enlarge(node) => node.graph_hash(self, builder),
            NodeKind::Invert(node) => node.graph_hash(self, builder),
            NodeKind::LodBias(node) => node.graph_hash(self, builder),
            NodeKind::MipChain(node) => {
                self.graph_hash(node.source, builder);
                builder.write_str(kind.type_name());
            }
            NodeKind::Subframe(node) => {
                self.graph_hash(node.source, builder);
                builder.write_str(kind.type_name());
            }
            NodeKind::VarianceCombine(node) => node.graph_hash(self, builder),
        }
    }

    /// Folds the data identity of `id` and everything upstream into `builder`.
    pub fn data_hash(&self, id: NodeId, ctx: &ProcessingContext, builder: &mut HashBuilder) {
        match &self.node(id).kind {
            NodeKind::Input(node) => self.data_hash(node.last, ctx, builder),
            NodeKind::Read(node) => node.data_hash(ctx, builder),
            NodeKind::Enlarge(node) => self.data_hash(node.source, ctx, builder),
            NodeKind::Invert(node) => node.data_hash(self, ctx, builder),
            NodeKind::LodBias(node) => self.data_hash(node.source, ctx, builder),
            NodeKind::MipChain(node) => self.data_hash(node.source, ctx, builder),
            NodeKind::Subframe(node) => node.data_hash(self, ctx, builder),
            NodeKind::VarianceCombine(node) => node.data_hash(self, ctx, builder),
        }
    }

    /// Graph hash of `id` as a standalone id.
    pub fn graph_id(&self, id: NodeId) -> DataId {
        let mut builder = HashBuilder::new();
        self.graph_hash(id, &mut builder);
        builder.finish()
    }

    /// Data hash of `id` as a standalone id.
    pub fn data_id(&self, id: NodeId, ctx: &ProcessingContext) -> DataId {
        let mut builder = HashBuilder::new();
        self.data_hash(id, ctx, &mut builder);
        builder.finish()
    }

    // --- prepare ---

    /// Prepares `id` and everything upstream. Idempotent.
    pub fn prepare(&mut self, id: NodeId, ctx: &ProcessingContext) {
        if self.node(id).state != NodeState::Created {
            return;
        }

        for upstream in self.node(id).kind.upstream() {
            self.prepare(upstream, ctx);
        }

        let dimension = match &self.node(id).kind {
            NodeKind::Input(node) => self.dimension(node.last),
            NodeKind::Read(_) => read::prepare(self, id, ctx),
            NodeKind::Enlarge(node) => node.dimension(self),
            NodeKind::Invert(_) => invert::prepare(self, id, ctx),
            NodeKind::LodBias(_) => lod_bias::prepare(self, id, ctx),
            NodeKind::MipChain(_) => mip_chain::prepare(self, id),
            NodeKind::Subframe(_) => subframe::prepare(self, id, ctx),
            NodeKind::VarianceCombine(_) => variance::prepare(self, id, ctx),
        };

        let node = self.node_mut(id);
        node.dimension = dimension;
        node.state = NodeState::Prepared;
    }

    // --- cache ---

    /// Computes heavy data for `id` and everything upstream.
    ///
    /// Concurrent callers block on the node's lock; the first result is shared.
    pub fn cache(&self, id: NodeId) -> Result<(), DecodeError> {
        let node = self.node(id);
        if let Some(result) = node.cached.get() {
            return result.clone();
        }

        let _guard = node.cache_lock.lock();
        if let Some(result) = node.cached.get() {
            return result.clone();
        }

        assert!(
            node.state == NodeState::Prepared,
            "cache of unprepared {id} ({})",
            node.kind.type_name()
        );

        let result = self.cache_node(id);
        let _ = node.cached.set(result.clone());
        result
    }

    fn cache_node(&self, id: NodeId) -> Result<(), DecodeError> {
        for upstream in self.node(id).kind.upstream() {
            self.cache(upstream)?;
        }

        match &self.node(id).kind {
            NodeKind::Read(node) => node.cache(self.dimension(id)),
            NodeKind::MipChain(node) => {
                node.cache(self);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // --- write ---

    /// Writes `channel` of `mip` for the region described by `tile` into `out`.
    ///
    /// Only indices addressed by `tile` are written.
    pub fn write_channel(
        &self,
        id: NodeId,
        channel: u8,
        mip: usize,
        tile: &TileDescriptor,
        out: &mut [f32],
    ) {
        debug_assert!(
            self.state(id) == NodeState::Cached,
            "write_channel on uncached {id}"
        );

        match &self.node(id).kind {
            NodeKind::Input(node) => self.write_channel(node.last, channel, mip, tile, out),
            NodeKind::Read(node) => node.write_channel(channel, mip, tile, out),
            NodeKind::Enlarge(node) => node.write_channel(self, channel, mip, tile, out),
            NodeKind::Invert(node) => node.write_channel(self, channel, mip, tile, out),
            NodeKind::LodBias(node) => node.write_channel(self, channel, mip, tile, out),
            NodeKind::MipChain(node) => node.write_channel(self, channel, mip, tile, out),
            NodeKind::Subframe(node) => node.write_channel(self, channel, mip, tile, out),
            NodeKind::VarianceCombine(node) => node.write_channel(self, channel, mip, tile, out),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use super::*;
    use crate::context::AssetParams;
    use crate::source::{MemorySource, SourceImage, SourceTextureRef, SourceTextures};
    use crate::texture::ChannelEncoding;
    use crate::tile::UVec3;

    /// Single-channel ramp `v(x, y) = (x + y * w) / (w * h)`.
    pub fn ramp(w: usize, h: usize) -> Vec<f32> {
        let n = (w * h) as f32;
        (0..w * h).map(|i| i as f32 / n).collect()
    }

    pub fn context_with(name: &str, size: UVec3, values: &[f32]) -> ProcessingContext {
        let source = Arc::new(MemorySource::new(SourceImage::from_r32f(size, values)));
        let sources = SourceTextures::new().with(name, SourceTextureRef::new(source));
        ProcessingContext::new(Arc::new(sources), AssetParams::new())
    }

    pub fn gray_def() -> SourceTextureDef {
        SourceTextureDef::new(TextureDef::new(1, ChannelEncoding::NONE), [0.25, 0.0, 0.0, 0.0])
    }

    /// Writes mip `mip` of channel 0 as one dense tile.
    pub fn render(arena: &NodeArena, id: NodeId, mip: usize) -> Vec<f32> {
        let def = arena.texture_def(id);
        let size = arena.dimension(id).mip_size(mip, def.is_volume());
        let tile = TileDescriptor::whole(size, 1, 0);
        let mut out = vec![f32::NAN; size.product()];
        arena.write_channel(id, 0, mip, &tile, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use crate::tile::UVec3;

    // --- lifecycle ---

    #[test]
    fn states_advance_through_lifecycle() {
        let ctx = context_with("A", UVec3::new(2, 2, 1), &[0.0, 0.25, 0.5, 0.75]);
        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());

        assert_eq!(arena.state(input), NodeState::Created);
        arena.prepare(input, &ctx);
        assert_eq!(arena.state(input), NodeState::Prepared);
        arena.cache(input).unwrap();
        assert_eq!(arena.state(input), NodeState::Cached);
        assert_eq!(render(&arena, input, 0), vec![0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn prepare_is_idempotent() {
        let ctx = context_with("A", UVec3::new(4, 4, 1), &ramp(4, 4));
        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());
        let lod = arena.add(Operator::LodBias { bias: -1, filter: Filter::Nearest }.instantiate(input));

        arena.prepare(lod, &ctx);
        let len = arena.len();
        arena.prepare(lod, &ctx);
        assert_eq!(arena.len(), len);
    }

    #[test]
    fn concurrent_cache_computes_once() {
        let ctx = context_with("A", UVec3::new(8, 8, 1), &ramp(8, 8));
        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());
        let mips = arena.add(Operator::MipChain.instantiate(input));
        arena.prepare(mips, &ctx);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| arena.cache(mips).unwrap());
            }
        });
        assert_eq!(arena.state(mips), NodeState::Cached);
    }

    // --- hashing ---

    #[test]
    fn operator_changes_graph_hash() {
        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());
        let inverted = arena.add(
            Operator::Invert {
                channels: ChannelMask::ALL,
                toggle: None,
            }
            .instantiate(input),
        );
        assert_ne!(arena.graph_id(input), arena.graph_id(inverted));
    }

    #[test]
    fn graph_hash_ignores_source_content() {
        let a = context_with("A", UVec3::ONE, &[0.0]);
        let b = context_with("A", UVec3::ONE, &[1.0]);
        let mut arena = NodeArena::new();
        let input = arena.add_input("A", gray_def());

        let graph = arena.graph_id(input);
        assert_ne!(arena.data_id(input, &a), arena.data_id(input, &b));
        assert_eq!(graph, arena.graph_id(input));
    }
}
