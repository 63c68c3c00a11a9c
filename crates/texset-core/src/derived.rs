//! Build outputs: derived textures, their pixels and shader parameters.
//!
//! [`DerivedData`] is what an asset exposes once a build completes. Each
//! [`DerivedTexture`] moves through [`DerivedTextureState`] as the compiler
//! configures it, allocates a placeholder source and finally generates pixels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::DataId;
use crate::packing::CompressionFormat;
use crate::texture::TextureDimension;
use crate::tile::UVec3;

/// Host texture object a derived texture is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextureHandle(pub u64);

impl core::fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

/// Texture object type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureKind {
    /// 2D texture, or a volume when it has more than one slice.
    #[default]
    Texture2D,
    /// Array of independent 2D slices.
    Texture2DArray,
}

/// Host-facing settings of a derived texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureSettings {
    /// Object type.
    pub kind: TextureKind,
    /// Sample with hardware sRGB decode.
    pub srgb: bool,
    /// Block compression.
    pub compression: CompressionFormat,
    /// Alpha carries no data.
    pub no_alpha: bool,
    /// Stream as a virtual texture.
    pub virtual_texture_streaming: bool,
    /// Load-time mip bias.
    pub lod_bias: i32,
}

/// Lifecycle of a derived texture's source data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DerivedTextureState {
    /// Freshly created.
    #[default]
    Invalid,
    /// Settings and id applied.
    Configured,
    /// Placeholder source of the right size, no pixels.
    SourceInitialized,
    /// Pixels generated.
    SourceGenerated,
}

/// RGBA32F source pixels of a derived texture.
///
/// An empty `mips_data` is a placeholder: sized and stamped, but not generated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextureSource {
    /// Mip 0 width.
    pub width: usize,
    /// Mip 0 height.
    pub height: usize,
    /// Mip 0 slices.
    pub slices: usize,
    /// Number of mips.
    pub mips: usize,
    /// Slices are array layers and do not shrink with mips.
    pub array: bool,
    /// Content id; equal to the owning texture's data id.
    pub id: DataId,
    /// Interleaved RGBA per mip, x fastest then y then z.
    pub mips_data: Vec<Vec<f32>>,
}

impl TextureSource {
    /// Placeholder of `dimension`.
    pub fn placeholder(dimension: TextureDimension, array: bool, id: DataId) -> Self {
        Self {
            width: dimension.width,
            height: dimension.height,
            slices: dimension.slices,
            mips: dimension.mips,
            array,
            id,
            mips_data: Vec::new(),
        }
    }

    /// Size and mip count.
    pub fn dimension(&self) -> TextureDimension {
        TextureDimension::new(self.width, self.height, self.slices, self.mips)
    }

    /// Size of `mip`.
    pub fn mip_size(&self, mip: usize) -> UVec3 {
        self.dimension().mip_size(mip, !self.array)
    }

    /// True when no pixels are present.
    pub fn is_placeholder(&self) -> bool {
        self.mips_data.is_empty()
    }

    /// Drops the pixels, keeping size and id.
    pub fn clear(&mut self) {
        self.mips_data = Vec::new();
    }

    /// RGBA of one pixel, or `None` for placeholders and out-of-range reads.
    pub fn pixel(&self, mip: usize, coord: UVec3) -> Option<[f32; 4]> {
        let size = self.mip_size(mip);
        if coord.x >= size.x || coord.y >= size.y || coord.z >= size.z {
            return None;
        }
        let data = self.mips_data.get(mip)?;
        let index = ((coord.z * size.y + coord.y) * size.x + coord.x) * 4;
        let px = data.get(index..index + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Cacheable result of building one packed texture.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedTextureData {
    /// Id of the inputs that produced this data.
    pub id: DataId,
    /// Range-compression constants, keyed by parameter name.
    #[serde(default)]
    pub texture_parameters: BTreeMap<String, [f32; 4]>,
}

/// Cacheable result of one shader parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedParameterData {
    /// Parameter value.
    pub value: [f32; 4],
    /// Id of the inputs that produced the value.
    pub id: DataId,
}

/// One packed output texture.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DerivedTexture {
    /// Host object name.
    pub name: String,
    /// Host-facing settings.
    pub settings: TextureSettings,
    /// Cacheable data.
    pub data: DerivedTextureData,
    /// Pixels, when generated.
    #[serde(skip)]
    pub source: TextureSource,
    /// Lifecycle.
    #[serde(skip)]
    pub state: DerivedTextureState,
    /// Host object.
    #[serde(default)]
    pub handle: Option<TextureHandle>,
}

impl DerivedTexture {
    /// Unconfigured texture called `name`.
    pub fn new(name: impl Into<String>, handle: Option<TextureHandle>) -> Self {
        Self {
            name: name.into(),
            handle,
            ..Self::default()
        }
    }
}

/// Everything a build of one texture set produces.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DerivedData {
    /// Packed textures, in packing order.
    pub textures: Vec<DerivedTexture>,
    /// Shader parameters by name.
    #[serde(default)]
    pub parameters: BTreeMap<String, DerivedParameterData>,
}

impl DerivedData {
    /// Parameter and range constant values by name.
    pub fn all_parameters(&self) -> BTreeMap<&str, [f32; 4]> {
        let mut all: BTreeMap<&str, [f32; 4]> = self
            .parameters
            .iter()
            .map(|(name, data)| (name.as_str(), data.value))
            .collect();
        for texture in &self.textures {
            for (name, value) in &texture.data.texture_parameters {
                all.insert(name.as_str(), *value);
            }
        }
        all
    }
}
