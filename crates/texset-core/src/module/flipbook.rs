//! Sprite-sheet animation.

use serde::{Deserialize, Serialize};

use super::TextureSetModule;
use crate::context::AssetParam;
use crate::error::PackingError;
use crate::graph::ProcessingGraph;
use crate::node::Operator;
use crate::packing::PackingInfo;
use crate::parameter::ParameterNode;
use crate::texture::{ChannelEncoding, SourceTextureDef, TextureDef};

/// How frames are laid out in the sources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipbookSourceType {
    /// Frames tiled in a grid inside each image.
    TextureSheet,
    /// One frame per slice.
    #[default]
    TextureArray,
}

/// Asset-level flipbook options.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipbookAssetParams {
    /// Frame layout.
    pub source_type: FlipbookSourceType,
    /// Frames across a sheet.
    pub sheet_width: u32,
    /// Frames down a sheet.
    pub sheet_height: u32,
    /// Frames per second.
    pub framerate: f32,
    /// Wrap to the first frame after the last.
    pub looping: bool,
    /// Scale applied to decoded motion vectors.
    pub motion_vector_scale: [f32; 2],
}

impl Default for FlipbookAssetParams {
    fn default() -> Self {
        Self {
            source_type: FlipbookSourceType::TextureArray,
            sheet_width: 4,
            sheet_height: 4,
            framerate: 15.0,
            looping: true,
            motion_vector_scale: [1.0, 1.0],
        }
    }
}

impl AssetParam for FlipbookAssetParams {
    const KEY: &'static str = "FlipbookAssetParams";
}

/// Splits every input into frames and publishes playback parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipbookModule {
    /// Adds a two-channel `MotionVector` element.
    pub use_motion_vectors: bool,
}

impl TextureSetModule for FlipbookModule {
    fn name(&self) -> &str {
        "Flipbook"
    }

    fn configure_graph(&self, graph: &mut ProcessingGraph) {
        graph.add_default_input_operator(Operator::Subframe);

        if self.use_motion_vectors {
            let def = SourceTextureDef::new(
                TextureDef::new(2, ChannelEncoding::RANGE_COMPRESSION),
                [0.5, 0.5, 0.0, 0.0],
            );
            let input = graph.add_input("MotionVector", def);
            graph.add_output_texture("MotionVector", input);
        }

        graph.add_output_parameter("FlipbookParams", ParameterNode::FlipbookParams);
    }

    fn validate(&self, _graph: &ProcessingGraph, packing: &PackingInfo) -> Vec<PackingError> {
        if !self.use_motion_vectors {
            return Vec::new();
        }
        let (Some((x_texture, _)), Some((y_texture, _))) = (
            packing.packing_source("MotionVector.r"),
            packing.packing_source("MotionVector.g"),
        ) else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        if x_texture != y_texture {
            errors.push(PackingError::new(
                "Motion vectors need to be packed into two channels of the same texture",
            ));
        }
        if packing.texture_def(x_texture).virtual_texture_streaming {
            errors.push(PackingError::new(
                "Derived textures containing flipbook motion vectors cannot be virtual textures.",
            ));
        }
        errors
    }
}
