//! A named set of pass-through texture elements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::TextureSetModule;
use crate::error::PackingError;
use crate::graph::ProcessingGraph;
use crate::packing::PackingInfo;
use crate::texture::SourceTextureDef;

/// Elements packed and unpacked with no extra processing. Each entry becomes
/// an input and an output of the same name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementCollectionModule {
    /// Display name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Element definitions by name.
    #[serde(default)]
    pub elements: BTreeMap<String, SourceTextureDef>,
}

fn default_name() -> String {
    "ElementCollection".to_string()
}

impl ElementCollectionModule {
    /// Empty collection called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elements: BTreeMap::new(),
        }
    }

    /// Adds an element.
    pub fn with_element(mut self, name: impl Into<String>, def: SourceTextureDef) -> Self {
        self.elements.insert(name.into(), def);
        self
    }
}

impl TextureSetModule for ElementCollectionModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure_graph(&self, graph: &mut ProcessingGraph) {
        for (name, def) in &self.elements {
            let input = graph.add_input(name, *def);
            graph.add_output_texture(name, input);
        }
    }

    fn validate(&self, _graph: &ProcessingGraph, _packing: &PackingInfo) -> Vec<PackingError> {
        let mut errors = Vec::new();
        for (name, def) in &self.elements {
            if name.is_empty() || name.contains('.') {
                errors.push(PackingError::new(format!(
                    "collection '{}': element name '{name}' must be non-empty and contain no '.'",
                    self.name
                )));
            }
            if !(1..=4).contains(&def.def.channel_count) {
                errors.push(PackingError::new(format!(
                    "collection '{}': element '{name}' has {} channels, expected 1 to 4",
                    self.name, def.def.channel_count
                )));
            }
        }
        errors
    }
}
