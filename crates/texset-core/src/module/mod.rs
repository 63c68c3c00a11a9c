//! Module configurations that populate a [`ProcessingGraph`].
//!
//! A texture set definition is an ordered list of modules. Each module adds
//! named inputs, operators, output textures and output parameters to the
//! graph, and can veto packings it cannot work with.
//!
//! # Example
//!
//! ```rust
//! use texset_core::graph::ModuleInfo;
//! use texset_core::module::{ModuleConfig, PbrModule};
//!
//! let info = ModuleInfo::new(vec![ModuleConfig::Pbr(PbrModule::default())]);
//! let textures = info.processed_textures();
//! assert!(textures.contains_key("BaseColor"));
//! assert!(textures.contains_key("TangentNormal"));
//! ```

mod collection;
mod custom;
mod flipbook;
mod height;
mod normal_to_roughness;
mod pbr;

use serde::{Deserialize, Serialize};

pub use collection::ElementCollectionModule;
pub use custom::{CustomElementModule, ElementOperator};
pub use flipbook::{FlipbookAssetParams, FlipbookModule, FlipbookSourceType};
pub use height::{HeightAssetParams, HeightModule};
pub use normal_to_roughness::NormalToRoughnessModule;
pub use pbr::{PbrAssetParams, PbrMicrosurface, PbrModule, PbrNormal, PbrParameterization};

use crate::error::PackingError;
use crate::graph::{ModuleInfo, ProcessingGraph};
use crate::packing::PackingInfo;

/// Behaviour shared by every module.
pub trait TextureSetModule {
    /// Display name for logs.
    fn name(&self) -> &str;

    /// Adds this module's inputs, operators and outputs to `graph`.
    fn configure_graph(&self, graph: &mut ProcessingGraph);

    /// Checks the module against the configured graph and packing.
    fn validate(&self, _graph: &ProcessingGraph, _packing: &PackingInfo) -> Vec<PackingError> {
        Vec::new()
    }
}

/// One configured module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModuleConfig {
    /// A single user-defined texture.
    CustomElement(CustomElementModule),
    /// Several pass-through elements.
    ElementCollection(ElementCollectionModule),
    /// Physically based surface textures.
    Pbr(PbrModule),
    /// Roughness corrected by normal variance.
    NormalToRoughness(NormalToRoughnessModule),
    /// Heightmap plus parallax parameters.
    Height(HeightModule),
    /// Sprite-sheet animation.
    Flipbook(FlipbookModule),
}

impl ModuleConfig {
    fn inner(&self) -> &dyn TextureSetModule {
        match self {
            Self::CustomElement(m) => m,
            Self::ElementCollection(m) => m,
            Self::Pbr(m) => m,
            Self::NormalToRoughness(m) => m,
            Self::Height(m) => m,
            Self::Flipbook(m) => m,
        }
    }
}

impl TextureSetModule for ModuleConfig {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn configure_graph(&self, graph: &mut ProcessingGraph) {
        self.inner().configure_graph(graph);
    }

    fn validate(&self, graph: &ProcessingGraph, packing: &PackingInfo) -> Vec<PackingError> {
        self.inner().validate(graph, packing)
    }
}

/// Every problem with a definition: graph builder errors, packing errors and
/// module vetoes, in that order. Empty when the definition can be compiled.
pub fn validate_definition(modules: &ModuleInfo, packing: &PackingInfo) -> Vec<PackingError> {
    let graph = ProcessingGraph::new(&modules.modules);
    let mut errors: Vec<PackingError> = graph
        .errors()
        .iter()
        .map(|e| PackingError::new(e.clone()))
        .collect();
    errors.extend(packing.errors().iter().cloned());
    for module in &modules.modules {
        errors.extend(module.validate(&graph, packing));
    }
    errors
}
