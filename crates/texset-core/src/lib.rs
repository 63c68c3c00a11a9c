//! Texset Core - processing-graph compiler for packed texture sets
//!
//! A texture set is a declarative description of the textures a material
//! needs. Modules publish named, processed textures (base colour, normals,
//! flipbook frames, ...). A packing definition then assigns their channels to
//! a small number of output textures. This crate builds the processing graph,
//! validates the packing, hashes everything that affects the output, and
//! renders the packed RGBA32F pixels plus vec4 shader parameters.
//!
//! # Core Abstractions
//!
//! ## Graph
//!
//! - [`ProcessingGraph`] - Named inputs, operator chains and named outputs
//! - [`NodeArena`] / [`NodeKind`] - Closed set of processing nodes indexed by [`NodeId`]
//! - [`ParameterNode`] - vec4 shader parameters derived from asset params
//!
//! ## Modules
//!
//! - [`ModuleConfig`] - Serializable module list entry (custom element, PBR,
//!   height, flipbook, normal-to-roughness)
//! - [`TextureSetModule`] - Graph configuration and validation hooks
//!
//! ## Packing and Compilation
//!
//! - [`PackingInfo`] - Validated channel-to-texture assignment
//! - [`Compiler`] - Ids, incremental checks and pixel generation
//! - [`DerivedData`] - Build output: textures, range constants, parameters
//!
//! ## Tiles and Hashing
//!
//! - [`TileDescriptor`] - Addressing of a sub-region inside a strided buffer
//! - [`HashBuilder`] / [`DataId`] - blake3 content hashing
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use texset_core::{
//!     Compiler, CompilerArgs, CustomElementModule, DerivedTexture, ModuleConfig, ModuleInfo,
//!     PackedTextureDef, PackingInfo, SourceTextures,
//! };
//!
//! let modules = ModuleInfo::new(vec![
//!     ModuleConfig::CustomElement(CustomElementModule::new("Color", 3)),
//!     ModuleConfig::CustomElement(CustomElementModule::new("Mask", 1)),
//! ]);
//! let packing = PackingInfo::new(
//!     &[PackedTextureDef::new(&["Color.r", "Color.g", "Color.b", "Mask.r"])],
//!     &modules.processed_textures(),
//! );
//! assert!(packing.is_valid());
//!
//! let args = CompilerArgs::new(modules, packing, Arc::new(SourceTextures::new()))
//!     .with_name_prefix("Rock");
//! let mut compiler = Compiler::new(Arc::new(args));
//! assert!(compiler.compilation_required(None));
//!
//! compiler.load_resources();
//! let mut texture = DerivedTexture::new(compiler.args().texture_name(0), None);
//! compiler.configure_texture(&mut texture, 0);
//! compiler.initialize_texture_source(&mut texture, 0);
//! compiler.generate_texture_source(&mut texture, 0).unwrap();
//! assert_eq!(texture.name, "Rock_Texture_0");
//! ```
//!
//! # Threading
//!
//! Graph construction, hashing and [`Compiler::load_resources`] run on one
//! coordinating thread. Pixel generation takes `&Compiler` and may run on any
//! number of threads; node caches are computed once and shared.

pub mod compiler;
pub mod context;
pub mod derived;
pub mod error;
pub mod graph;
pub mod hash;
pub mod module;
pub mod node;
pub mod packing;
pub mod parameter;
pub mod source;
pub mod texture;
pub mod tile;

// Re-export main types at crate root
pub use compiler::{Compiler, CompilerArgs};
pub use context::{AssetParam, AssetParams, ProcessingContext};
pub use derived::{
    DerivedData, DerivedParameterData, DerivedTexture, DerivedTextureData, DerivedTextureState,
    TextureHandle, TextureKind, TextureSettings, TextureSource,
};
pub use error::{CompileError, DecodeError, PackingError, SourceError};
pub use graph::{ModuleInfo, ProcessingGraph};
pub use hash::{DataId, HashBuilder, Hashable};
pub use module::{
    CustomElementModule, ElementCollectionModule, ElementOperator, FlipbookAssetParams,
    FlipbookModule, FlipbookSourceType, HeightAssetParams, HeightModule, ModuleConfig,
    NormalToRoughnessModule, PbrAssetParams, PbrMicrosurface, PbrModule, PbrNormal,
    PbrParameterization, TextureSetModule, validate_definition,
};
pub use node::{Filter, NodeArena, NodeId, NodeKind, NodeState, NormalToRoughnessAssetParams, Operator};
pub use packing::{
    CompressionFormat, PackedChannelInfo, PackedTextureDef, PackedTextureInfo, PackingInfo,
};
pub use parameter::ParameterNode;
pub use source::{
    ChannelMask, MemorySource, PixelFormat, SourceImage, SourceProvider, SourceTexture,
    SourceTextureRef, SourceTextures,
};
pub use texture::{
    ChannelEncoding, SourceTextureDef, TextureDef, TextureDimension, TextureFlags,
};
pub use tile::{TileDescriptor, UVec3};
