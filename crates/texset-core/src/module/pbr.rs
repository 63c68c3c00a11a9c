//! Physically based surface elements.

use serde::{Deserialize, Serialize};

use super::TextureSetModule;
use crate::context::{AssetParam, AssetParams};
use crate::graph::ProcessingGraph;
use crate::node::{Operator, ParamToggle};
use crate::source::ChannelMask;
use crate::texture::{ChannelEncoding, SourceTextureDef, TextureDef};

/// How base reflectance is authored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbrParameterization {
    /// `BaseColor` plus `Metallic`.
    #[default]
    BaseColorMetal,
    /// `Albedo` plus `Specular`.
    AlbedoSpec,
}

/// How microsurface detail is authored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbrMicrosurface {
    /// `Roughness`, 1 = rough.
    #[default]
    Roughness,
    /// `Smoothness`, 1 = smooth.
    Smoothness,
}

/// Normal map space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbrNormal {
    /// Two-channel tangent-space normal; Z is reconstructed.
    #[default]
    TangentNormal,
    /// Three-channel world-space normal.
    WorldNormal,
}

/// Asset-level PBR options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbrAssetParams {
    /// Invert the green channel of tangent normals (DirectX-style sources).
    pub flip_normal_green: bool,
}

impl AssetParam for PbrAssetParams {
    const KEY: &'static str = "PbrAssetParams";
}

fn flip_normal_green(params: &AssetParams) -> bool {
    params.get::<PbrAssetParams>().flip_normal_green
}

/// Toggle for the green-channel invert on tangent normals.
pub(crate) const FLIP_NORMAL_GREEN: ParamToggle = ParamToggle {
    name: "FlipNormalGreen",
    read: flip_normal_green,
};

/// PBR surface textures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbrModule {
    /// Reflectance layout.
    pub parameterization: PbrParameterization,
    /// Microsurface layout.
    pub microsurface: PbrMicrosurface,
    /// Normal layout.
    pub normal: PbrNormal,
}

impl TextureSetModule for PbrModule {
    fn name(&self) -> &str {
        "PBR"
    }

    fn configure_graph(&self, graph: &mut ProcessingGraph) {
        let srgb3 = TextureDef::new(3, ChannelEncoding::SRGB);
        let linear1 = TextureDef::new(1, ChannelEncoding::NONE);
        let compressed1 = TextureDef::new(1, ChannelEncoding::RANGE_COMPRESSION);

        let publish = |graph: &mut ProcessingGraph, name: &str, def: TextureDef, value: [f32; 4]| {
            let input = graph.add_input(name, SourceTextureDef::new(def, value));
            graph.add_output_texture(name, input);
            input
        };

        match self.parameterization {
            PbrParameterization::BaseColorMetal => {
                publish(graph, "BaseColor", srgb3, [0.5, 0.5, 0.5, 0.0]);
                publish(graph, "Metallic", linear1, [0.0; 4]);
            }
            PbrParameterization::AlbedoSpec => {
                publish(graph, "Albedo", srgb3, [0.5, 0.5, 0.5, 0.0]);
                publish(graph, "Specular", srgb3, [0.0; 4]);
            }
        }

        let microsurface = match self.microsurface {
            PbrMicrosurface::Roughness => "Roughness",
            PbrMicrosurface::Smoothness => "Smoothness",
        };
        publish(graph, microsurface, compressed1, [0.5, 0.0, 0.0, 0.0]);

        let normal_value = [0.5, 0.5, 1.0, 0.0];
        match self.normal {
            PbrNormal::TangentNormal => {
                let def = TextureDef::new(2, ChannelEncoding::RANGE_COMPRESSION);
                let input = publish(graph, "TangentNormal", def, normal_value);
                graph.add_input_operator(
                    input,
                    Operator::Invert {
                        channels: ChannelMask::G,
                        toggle: Some(FLIP_NORMAL_GREEN),
                    },
                );
            }
            PbrNormal::WorldNormal => {
                let def = TextureDef::new(3, ChannelEncoding::RANGE_COMPRESSION);
                publish(graph, "WorldNormal", def, normal_value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleConfig;
    use crate::node::NodeKind;

    fn outputs(module: PbrModule) -> Vec<String> {
        ProcessingGraph::new(&[ModuleConfig::Pbr(module)])
            .output_textures()
            .keys()
            .cloned()
            .collect()
    }

    #[test]
    fn default_layout() {
        assert_eq!(
            outputs(PbrModule::default()),
            ["BaseColor", "Metallic", "Roughness", "TangentNormal"]
        );
    }

    #[test]
    fn albedo_spec_smoothness_world() {
        let module = PbrModule {
            parameterization: PbrParameterization::AlbedoSpec,
            microsurface: PbrMicrosurface::Smoothness,
            normal: PbrNormal::WorldNormal,
        };
        assert_eq!(
            outputs(module),
            ["Albedo", "Smoothness", "Specular", "WorldNormal"]
        );
    }

    #[test]
    fn tangent_normal_gets_flip_toggle() {
        let graph = ProcessingGraph::new(&[ModuleConfig::Pbr(PbrModule::default())]);
        let NodeKind::Input(input) = graph.arena().kind(graph.inputs()["TangentNormal"]) else {
            panic!("not an input");
        };
        let NodeKind::Invert(invert) = graph.arena().kind(input.last) else {
            panic!("expected invert");
        };
        assert_eq!(invert.toggle, Some(FLIP_NORMAL_GREEN));
        assert_eq!(invert.channels, ChannelMask::G);
        assert_eq!(graph.arena().kind(input.last).type_name(), "FlipNormalGreen");
    }

    #[test]
    fn base_color_is_srgb() {
        let defs = ProcessingGraph::new(&[ModuleConfig::Pbr(PbrModule::default())])
            .processed_texture_defs();
        assert!(defs["BaseColor"].encoding.contains(ChannelEncoding::SRGB));
        assert_eq!(defs["TangentNormal"].channel_count, 2);
    }
}
