//! Shader parameter nodes: vec4 values derived from asset configuration.
//!
//! Parameter nodes follow the same hashing contract as texture nodes, but
//! produce a single `[f32; 4]` instead of pixels. Their value is evaluated on
//! the coordinating thread after the graph's texture outputs are prepared.

use crate::context::{AssetParams, ProcessingContext};
use crate::hash::HashBuilder;
use crate::module::FlipbookAssetParams;
use crate::node::{NodeArena, NodeId};

/// Produces one named vec4 shader parameter.
#[derive(Clone, Copy, Debug)]
pub enum ParameterNode {
    /// Value read straight from asset params.
    Passthrough {
        /// Type name folded into the graph hash.
        name: &'static str,
        /// Reads the value.
        read: fn(&AssetParams) -> [f32; 4],
    },
    /// Flipbook playback constants:
    /// `(motion_vector_scale.x, motion_vector_scale.y, ±framerate, frame count)`.
    ///
    /// The framerate is negative when the flipbook loops. The frame count is
    /// the largest slice count across the graph's output textures.
    FlipbookParams,
}

impl ParameterNode {
    /// Stable type name folded into graph hashes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Passthrough { name, .. } => *name,
            Self::FlipbookParams => "FlipbookParams v1",
        }
    }

    /// Folds the structure of this parameter into `builder`.
    ///
    /// `textures` are the graph's texture outputs.
    pub fn graph_hash(&self, arena: &NodeArena, textures: &[NodeId], builder: &mut HashBuilder) {
        builder.write_str(self.type_name());
        if let Self::FlipbookParams = self {
            for &texture in textures {
                arena.graph_hash(texture, builder);
            }
        }
    }

    /// Folds the inputs of this parameter's value into `builder`.
    pub fn data_hash(
        &self,
        arena: &NodeArena,
        textures: &[NodeId],
        ctx: &ProcessingContext,
        builder: &mut HashBuilder,
    ) {
        match self {
            Self::Passthrough { read, .. } => {
                builder.write(&read(&ctx.asset_params));
            }
            Self::FlipbookParams => {
                let params = ctx.asset_params.get::<FlipbookAssetParams>();
                builder
                    .write(&params.motion_vector_scale)
                    .write_f32(params.framerate)
                    .write_bool(params.looping);
                for &texture in textures {
                    arena.data_hash(texture, ctx, builder);
                }
            }
        }
    }

    /// Computes the value. Texture outputs must be prepared.
    pub fn evaluate(&self, arena: &NodeArena, textures: &[NodeId], ctx: &ProcessingContext) -> [f32; 4] {
        match self {
            Self::Passthrough { read, .. } => read(&ctx.asset_params),
            Self::FlipbookParams => {
                let params = ctx.asset_params.get::<FlipbookAssetParams>();
                let frames = textures
                    .iter()
                    .map(|&t| arena.dimension(t).slices)
                    .max()
                    .unwrap_or(1);
                let framerate = if params.looping {
                    -params.framerate
                } else {
                    params.framerate
                };
                [
                    params.motion_vector_scale[0],
                    params.motion_vector_scale[1],
                    framerate,
                    frames as f32,
                ]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::HeightAssetParams;
    use crate::node::Operator;
    use crate::texture::{ChannelEncoding, SourceTextureDef, TextureDef};
    use crate::tile::UVec3;

    fn height_params(params: &AssetParams) -> [f32; 4] {
        let height = params.get::<HeightAssetParams>();
        [height.scale, height.reference_plane, 0.0, 0.0]
    }

    #[test]
    fn passthrough_reads_asset_params() {
        let node = ParameterNode::Passthrough {
            name: "HeightParams",
            read: height_params,
        };
        let mut ctx = ProcessingContext::empty();
        ctx.asset_params.set(&HeightAssetParams {
            scale: 0.2,
            reference_plane: 0.5,
        });
        let arena = NodeArena::new();
        assert_eq!(node.evaluate(&arena, &[], &ctx), [0.2, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn passthrough_data_hash_follows_value() {
        let node = ParameterNode::Passthrough {
            name: "HeightParams",
            read: height_params,
        };
        let arena = NodeArena::new();
        let a = ProcessingContext::empty();
        let mut b = ProcessingContext::empty();
        b.asset_params.set(&HeightAssetParams {
            scale: 2.0,
            ..HeightAssetParams::default()
        });

        let hash = |ctx: &ProcessingContext| {
            let mut builder = HashBuilder::new();
            node.data_hash(&arena, &[], ctx, &mut builder);
            builder.finish()
        };
        assert_ne!(hash(&a), hash(&b));
    }

    #[test]
    fn flipbook_reports_frames_and_signed_framerate() {
        let mut ctx = ProcessingContext::empty();
        ctx.asset_params.set(&FlipbookAssetParams {
            framerate: 24.0,
            looping: true,
            motion_vector_scale: [0.5, 2.0],
            ..FlipbookAssetParams::default()
        });

        let mut arena = NodeArena::new();
        let def = SourceTextureDef::new(TextureDef::new(1, ChannelEncoding::NONE), [0.0; 4]);
        let input = arena.add_input("Missing", def);
        let frames = arena.add(Operator::Subframe.instantiate(input));
        arena.prepare(frames, &ctx);

        let value = ParameterNode::FlipbookParams.evaluate(&arena, &[frames], &ctx);
        assert_eq!(value, [0.5, 2.0, -24.0, 1.0]);
        assert_eq!(arena.dimension(frames).size(), UVec3::ONE);
    }
}
