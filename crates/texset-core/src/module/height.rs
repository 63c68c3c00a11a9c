//! Heightmap element and its parallax parameters.

use serde::{Deserialize, Serialize};

use super::TextureSetModule;
use crate::context::{AssetParam, AssetParams};
use crate::error::PackingError;
use crate::graph::ProcessingGraph;
use crate::packing::PackingInfo;
use crate::parameter::ParameterNode;
use crate::texture::{ChannelEncoding, SourceTextureDef, TextureDef};

/// Asset-level heightmap options.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeightAssetParams {
    /// World-space depth of a full-range height.
    pub scale: f32,
    /// Neutral height: 0 extrudes, 1 insets.
    pub reference_plane: f32,
}

impl Default for HeightAssetParams {
    fn default() -> Self {
        Self {
            scale: 0.05,
            reference_plane: 1.0,
        }
    }
}

impl AssetParam for HeightAssetParams {
    const KEY: &'static str = "HeightAssetParams";
}

fn height_params(params: &AssetParams) -> [f32; 4] {
    let height = params.get::<HeightAssetParams>();
    [height.scale, height.reference_plane, 0.0, 0.0]
}

/// `Height` input plus the `HeightParams` parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeightModule {
    /// Input and output name.
    pub name: String,
}

impl Default for HeightModule {
    fn default() -> Self {
        Self {
            name: "Height".to_string(),
        }
    }
}

impl TextureSetModule for HeightModule {
    fn name(&self) -> &str {
        "Height"
    }

    fn configure_graph(&self, graph: &mut ProcessingGraph) {
        let def = SourceTextureDef::new(
            TextureDef::new(1, ChannelEncoding::RANGE_COMPRESSION),
            [1.0, 0.0, 0.0, 0.0],
        );
        let input = graph.add_input(&self.name, def);
        graph.add_output_texture(&self.name, input);
        graph.add_output_parameter(
            "HeightParams",
            ParameterNode::Passthrough {
                name: "HeightParams",
                read: height_params,
            },
        );
    }

    fn validate(&self, _graph: &ProcessingGraph, packing: &PackingInfo) -> Vec<PackingError> {
        match packing.packing_source(&format!("{}.r", self.name)) {
            Some((texture, _)) if packing.texture_def(texture).virtual_texture_streaming => {
                vec![PackingError::new(format!(
                    "{} cannot be a channel in a derived texture that is tagged as a virtual texture.",
                    self.name
                ))]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModuleInfo;
    use crate::module::ModuleConfig;
    use crate::packing::PackedTextureDef;

    fn packing(virtual_texture: bool) -> (ModuleInfo, PackingInfo) {
        let info = ModuleInfo::new(vec![ModuleConfig::Height(HeightModule::default())]);
        let mut def = PackedTextureDef::new(&["Height.r"]);
        def.virtual_texture_streaming = virtual_texture;
        let packing = PackingInfo::new(&[def], &info.processed_textures());
        (info, packing)
    }

    #[test]
    fn publishes_height_params() {
        let graph = ProcessingGraph::new(&[ModuleConfig::Height(HeightModule::default())]);
        assert!(graph.output_parameters().contains_key("HeightParams"));
        assert_eq!(height_params(&AssetParams::new()), [0.05, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn virtual_texture_height_is_rejected() {
        let (info, packing) = packing(true);
        let graph = ProcessingGraph::new(&info.modules);
        let errors = HeightModule::default().validate(&graph, &packing);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("virtual texture"));
    }

    #[test]
    fn plain_texture_height_is_fine() {
        let (info, packing) = packing(false);
        let graph = ProcessingGraph::new(&info.modules);
        assert!(HeightModule::default().validate(&graph, &packing).is_empty());
    }
}
