//! A single user-defined texture element.

use serde::{Deserialize, Serialize};

use super::TextureSetModule;
use crate::error::PackingError;
use crate::graph::ProcessingGraph;
use crate::node::{Filter, Operator};
use crate::packing::PackingInfo;
use crate::source::ChannelMask;
use crate::texture::{ChannelEncoding, SourceTextureDef, TextureDef};

/// Operator a custom element applies to its input.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ElementOperator {
    /// `1 - x` on `channels`.
    Invert {
        /// Channel bits: r=1, g=2, b=4, a=8.
        #[serde(default)]
        channels: ChannelMask,
    },
    /// Mip shift; negative values upsample.
    LodBias {
        /// Levels to shift.
        bias: i32,
        /// Filter for upsampled levels.
        #[serde(default)]
        filter: Filter,
    },
}

impl ElementOperator {
    fn operator(self) -> Operator {
        match self {
            Self::Invert { channels } => Operator::Invert {
                channels,
                toggle: None,
            },
            Self::LodBias { bias, filter } => Operator::LodBias { bias, filter },
        }
    }
}

/// One input texture published under its own name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomElementModule {
    /// Input and output name.
    pub name: String,
    /// Channels, 1 to 4.
    #[serde(default = "default_channel_count")]
    pub channel_count: u8,
    /// Remap each channel to its full range before packing.
    #[serde(default)]
    pub range_compression: bool,
    /// Store colour data in sRGB.
    #[serde(default)]
    pub srgb: bool,
    /// Fill value when no source is bound.
    #[serde(default)]
    pub default_value: [f32; 4],
    /// Operators applied after the read.
    #[serde(default)]
    pub operators: Vec<ElementOperator>,
}

fn default_channel_count() -> u8 {
    4
}

impl CustomElementModule {
    /// Plain element with no encoding, default value zero and no operators.
    pub fn new(name: impl Into<String>, channel_count: u8) -> Self {
        Self {
            name: name.into(),
            channel_count,
            range_compression: false,
            srgb: false,
            default_value: [0.0; 4],
            operators: Vec::new(),
        }
    }

    /// Encoding bits selected by the flags.
    pub fn encoding(&self) -> ChannelEncoding {
        let mut encoding = ChannelEncoding::NONE;
        if self.range_compression {
            encoding |= ChannelEncoding::RANGE_COMPRESSION;
        }
        if self.srgb {
            encoding |= ChannelEncoding::SRGB;
        }
        encoding
    }
}

impl TextureSetModule for CustomElementModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure_graph(&self, graph: &mut ProcessingGraph) {
        let def = SourceTextureDef::new(
            TextureDef::new(self.channel_count.clamp(1, 4), self.encoding()),
            self.default_value,
        );
        let input = graph.add_input(&self.name, def);
        for op in &self.operators {
            graph.add_input_operator(input, op.operator());
        }
        graph.add_output_texture(&self.name, input);
    }

    fn validate(&self, _graph: &ProcessingGraph, _packing: &PackingInfo) -> Vec<PackingError> {
        let mut errors = Vec::new();
        if self.name.is_empty() || self.name.contains('.') {
            errors.push(PackingError::new(format!(
                "custom element name '{}' must be non-empty and contain no '.'",
                self.name
            )));
        }
        if !(1..=4).contains(&self.channel_count) {
            errors.push(PackingError::new(format!(
                "custom element '{}' has {} channels, expected 1 to 4",
                self.name, self.channel_count
            )));
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn encoding_follows_flags() {
        let mut module = CustomElementModule::new("Color", 3);
        assert_eq!(module.encoding(), ChannelEncoding::NONE);
        module.srgb = true;
        module.range_compression = true;
        assert!(module.encoding().contains(ChannelEncoding::SRGB));
        assert!(module.encoding().contains(ChannelEncoding::RANGE_COMPRESSION));
    }

    #[test]
    fn operators_chain_after_read() {
        let mut module = CustomElementModule::new("Mask", 1);
        module.operators.push(ElementOperator::Invert {
            channels: ChannelMask::R,
        });
        let graph = ProcessingGraph::new(&[super::super::ModuleConfig::CustomElement(module)]);

        let NodeKind::Input(input) = graph.arena().kind(graph.inputs()["Mask"]) else {
            panic!("not an input");
        };
        assert!(matches!(graph.arena().kind(input.last), NodeKind::Invert(_)));
    }

    #[test]
    fn rejects_bad_channel_count() {
        let module = CustomElementModule::new("Mask", 5);
        let graph = ProcessingGraph::default();
        let packing = PackingInfo::default();
        assert_eq!(module.validate(&graph, &packing).len(), 1);
    }
}
