//! Roughness corrected by normal-map variance.

use serde::{Deserialize, Serialize};

use super::TextureSetModule;
use crate::error::PackingError;
use crate::graph::ProcessingGraph;
use crate::node::{NodeKind, Operator, VarianceCombineNode};
use crate::packing::PackingInfo;
use crate::texture::{ChannelEncoding, SourceTextureDef, TextureDef};

/// Replaces the roughness output with
/// `VarianceCombine(MipChain(roughness), MipChain(normal))`.
///
/// Must come after the module that defines both inputs; missing inputs are
/// created with PBR defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalToRoughnessModule {
    /// Roughness input, also the output that gets replaced.
    pub roughness: String,
    /// Three-channel normal input.
    pub normal: String,
}

impl Default for NormalToRoughnessModule {
    fn default() -> Self {
        Self {
            roughness: "Roughness".to_string(),
            normal: "WorldNormal".to_string(),
        }
    }
}

impl TextureSetModule for NormalToRoughnessModule {
    fn name(&self) -> &str {
        "NormalToRoughness"
    }

    fn configure_graph(&self, graph: &mut ProcessingGraph) {
        let roughness = graph.add_input(
            &self.roughness,
            SourceTextureDef::new(
                TextureDef::new(1, ChannelEncoding::RANGE_COMPRESSION),
                [0.5, 0.0, 0.0, 0.0],
            ),
        );
        let normal = graph.add_input(
            &self.normal,
            SourceTextureDef::new(
                TextureDef::new(3, ChannelEncoding::RANGE_COMPRESSION),
                [0.5, 0.5, 1.0, 0.0],
            ),
        );

        let arena = graph.arena();
        if arena.texture_def(normal).channel_count != 3
            || arena.texture_def(roughness).channel_count != 1
        {
            tracing::debug!(
                "normal_to_roughness: '{}'/'{}' have the wrong channel counts, skipping",
                self.roughness,
                self.normal
            );
            return;
        }

        let roughness_mips = graph.add_node(Operator::MipChain.instantiate(roughness));
        let normal_mips = graph.add_node(Operator::MipChain.instantiate(normal));
        let combined = graph.add_node(NodeKind::VarianceCombine(VarianceCombineNode::new(
            roughness_mips,
            normal_mips,
        )));
        graph.add_output_texture_override(&self.roughness, combined);
    }

    fn validate(&self, graph: &ProcessingGraph, _packing: &PackingInfo) -> Vec<PackingError> {
        let mut errors = Vec::new();
        let arena = graph.arena();
        if let Some(&normal) = graph.inputs().get(&self.normal)
            && arena.texture_def(normal).channel_count != 3
        {
            errors.push(PackingError::new(format!(
                "normal to roughness needs a three channel normal, '{}' has {}",
                self.normal,
                arena.texture_def(normal).channel_count
            )));
        }
        if let Some(&roughness) = graph.inputs().get(&self.roughness)
            && arena.texture_def(roughness).channel_count != 1
        {
            errors.push(PackingError::new(format!(
                "normal to roughness needs a one channel roughness, '{}' has {}",
                self.roughness,
                arena.texture_def(roughness).channel_count
            )));
        }
        errors
    }
}
