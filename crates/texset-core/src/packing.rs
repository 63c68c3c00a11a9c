//! Packing of processed channels into output textures.
//!
//! A [`PackedTextureDef`] names up to four processed channels (`"Name.r"`,
//! `"Name.g"`, ...) that land in the R, G, B and A of one derived texture.
//! [`PackingInfo`] checks a list of those against the processed textures a
//! graph produces and resolves each slot to a processed texture and channel.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use texset_core::packing::{PackedTextureDef, PackingInfo};
//! use texset_core::texture::{ChannelEncoding, TextureDef};
//!
//! let mut processed = BTreeMap::new();
//! processed.insert("Mask".to_string(), TextureDef::new(2, ChannelEncoding::NONE));
//!
//! let info = PackingInfo::new(&[PackedTextureDef::new(&["Mask.r", "Mask.g"])], &processed);
//! assert!(info.is_valid());
//! assert_eq!(info.packing_source("Mask.g"), Some((0, 1)));
//! ```

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PackingError;
use crate::hash::{HashBuilder, Hashable};
use crate::texture::{ChannelEncoding, TextureDef, TextureFlags};

/// Suffixes naming the channels of a processed texture.
pub const CHANNEL_SUFFIXES: [&str; 4] = [".r", ".g", ".b", ".a"];

/// Prefix shared by every generated shader parameter.
pub const PARAMETER_PREFIX: &str = "TEXSET_";

/// Block compression of a packed texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionFormat {
    /// BC1/BC3 colour.
    #[default]
    Default,
    /// BC5 two-channel.
    NormalMap,
    /// Linear four-channel.
    Masks,
    /// Single channel, 8 bits.
    Grayscale,
    /// Single channel, 8 or 16 bits.
    DisplacementMap,
    /// Uncompressed RGB.
    VectorDisplacementMap,
    /// RGBA half float.
    Hdr,
    /// Alpha only.
    Alpha,
    /// Single channel distance field.
    DistanceFieldFont,
    /// BC6H.
    HdrCompressed,
    /// BC7.
    Bc7,
    /// Single channel half float.
    HalfFloat,
    /// Low quality RGB.
    Lq,
    /// Single channel float.
    SingleFloat,
    /// RGBA float.
    HdrF32,
}

impl CompressionFormat {
    /// Channels the format stores.
    pub const fn available_channels(self) -> usize {
        match self {
            Self::Default | Self::Masks | Self::Hdr | Self::HdrF32 | Self::Bc7 => 4,
            Self::VectorDisplacementMap | Self::HdrCompressed | Self::Lq => 3,
            Self::NormalMap => 2,
            Self::DisplacementMap
            | Self::Grayscale
            | Self::Alpha
            | Self::HalfFloat
            | Self::DistanceFieldFont
            | Self::SingleFloat => 1,
        }
    }

    /// True when the GPU can decode sRGB for this format.
    pub const fn hardware_srgb_supported(self) -> bool {
        matches!(self, Self::Default | Self::Bc7 | Self::Lq)
    }
}

/// One output texture: up to four processed channels plus texture settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedTextureDef {
    /// Compression of the output.
    #[serde(default)]
    pub compression: CompressionFormat,
    /// `Name.ch` per output channel; `None` leaves the channel unused.
    #[serde(
        default,
        serialize_with = "serialize_sources",
        deserialize_with = "deserialize_sources"
    )]
    pub sources: [Option<String>; 4],
    /// Stream the texture as a virtual texture.
    #[serde(default)]
    pub virtual_texture_streaming: bool,
    /// Mip bias applied by the host at load time.
    #[serde(default)]
    pub lod_bias: i32,
}

impl PackedTextureDef {
    /// Default-compressed texture packing `sources` in order. Empty strings
    /// leave a slot unused; anything past four is ignored.
    pub fn new(sources: &[&str]) -> Self {
        let mut def = Self::default();
        for (slot, name) in def.sources.iter_mut().zip(sources) {
            if !name.is_empty() {
                *slot = Some((*name).to_string());
            }
        }
        def
    }

    /// Replaces the compression format.
    #[must_use]
    pub fn with_compression(mut self, compression: CompressionFormat) -> Self {
        self.compression = compression;
        self
    }

    /// Channels the compression format stores.
    pub fn available_channels(&self) -> usize {
        self.compression.available_channels()
    }

    /// Index of the last named slot plus one.
    pub fn used_channels(&self) -> usize {
        used_channels(&self.sources)
    }

    /// Slots that are packed: the first `min(used, available)`.
    pub fn sources(&self) -> &[Option<String>] {
        &self.sources[..self.used_channels().min(self.available_channels())]
    }

    /// Processed texture names referenced by this texture, deduplicated.
    pub fn source_textures(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for source in self.sources().iter().flatten() {
            let name = split_channel(source).map_or(source.as_str(), |(name, _)| name);
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

impl Hashable for PackedTextureDef {
    fn hash_into(&self, builder: &mut HashBuilder) {
        for source in &self.sources {
            builder.write_str(source.as_deref().unwrap_or(""));
        }
        builder
            .write_bool(self.virtual_texture_streaming)
            .write_i32(self.lod_bias)
            .write_u32(self.compression as u32);
    }
}

fn used_channels(sources: &[Option<String>; 4]) -> usize {
    sources.iter().rposition(Option::is_some).map_or(0, |i| i + 1)
}

fn serialize_sources<S: Serializer>(
    sources: &[Option<String>; 4],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(
        sources[..used_channels(sources)]
            .iter()
            .map(|source| source.as_deref().unwrap_or("")),
    )
}

fn deserialize_sources<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<[Option<String>; 4], D::Error> {
    let list = Vec::<String>::deserialize(deserializer)?;
    if list.len() > 4 {
        return Err(D::Error::invalid_length(list.len(), &"at most four sources"));
    }
    let mut sources: [Option<String>; 4] = Default::default();
    for (slot, name) in sources.iter_mut().zip(list) {
        if !name.is_empty() {
            *slot = Some(name);
        }
    }
    Ok(sources)
}

/// Splits `"Name.g"` into `("Name", 1)`.
pub fn split_channel(source: &str) -> Option<(&str, usize)> {
    let dot = source.rfind('.')?;
    let channel = CHANNEL_SUFFIXES
        .iter()
        .position(|suffix| *suffix == &source[dot..])?;
    Some((&source[..dot], channel))
}

/// Where one packed channel comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedChannelInfo {
    /// Processed texture name.
    pub processed_texture: String,
    /// Channel within the processed texture.
    pub processed_channel: usize,
    /// Encoding of the processed texture.
    pub encoding: ChannelEncoding,
}

/// Resolved layout of one packed texture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedTextureInfo {
    /// Packed slots, including unused ones below the last named slot.
    pub channel_count: usize,
    /// Source per slot; `None` when unused or invalid.
    pub channels: [Option<PackedChannelInfo>; 4],
    /// Union of the channel encodings.
    pub channel_encodings: ChannelEncoding,
    /// Flags shared by every source.
    pub flags: TextureFlags,
    /// Let the GPU decode sRGB for R, G and B.
    pub hardware_srgb: bool,
    /// Range-compression multiply parameter.
    pub range_compress_mul_name: String,
    /// Range-compression add parameter.
    pub range_compress_add_name: String,
}

impl PackedTextureInfo {
    fn new(index: usize, hardware_srgb: bool) -> Self {
        Self {
            channel_count: 0,
            channels: Default::default(),
            channel_encodings: ChannelEncoding::NONE,
            flags: TextureFlags::NONE,
            hardware_srgb,
            range_compress_mul_name: format!("RangeCompress_{index}_Mul"),
            range_compress_add_name: format!("RangeCompress_{index}_Add"),
        }
    }
}

/// Validated packing of processed textures into derived textures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackingInfo {
    defs: Vec<PackedTextureDef>,
    infos: Vec<PackedTextureInfo>,
    sources: BTreeMap<String, (usize, usize)>,
    errors: Vec<PackingError>,
}

impl PackingInfo {
    /// Resolves `defs` against `processed`. Problems are collected in
    /// [`errors`](Self::errors); this never fails.
    pub fn new(defs: &[PackedTextureDef], processed: &BTreeMap<String, TextureDef>) -> Self {
        let mut info = Self {
            defs: defs.to_vec(),
            ..Self::default()
        };

        let mut packed_channels: Vec<&str> = Vec::new();
        for (i, def) in defs.iter().enumerate() {
            if def.used_channels() > def.available_channels() {
                info.error(format!(
                    "Packed texture {i} is specifying more packed channels than are provided by the chosen compression format."
                ));
            }

            let mut texture = PackedTextureInfo::new(i, def.compression.hardware_srgb_supported());
            let mut first_source = true;

            for (c, source) in def.sources().iter().enumerate() {
                let Some(source) = source else {
                    continue;
                };

                if packed_channels.contains(&source.as_str()) {
                    info.error(format!(
                        "Processed texture {source} appears more than once in the packing definition."
                    ));
                    continue;
                }
                packed_channels.push(source);

                let Some((name, channel)) = split_channel(source) else {
                    info.error(format!(
                        "'{source}' in packed texture {i} does not end in one of .r, .g, .b or .a."
                    ));
                    continue;
                };

                let Some(processed_def) = processed.get(name) else {
                    info.error(format!(
                        "Processed texture '{name}' does not exist and cannot be packed."
                    ));
                    continue;
                };

                if channel >= usize::from(processed_def.channel_count) {
                    info.error(format!(
                        "Processed texture '{name}' only has {} channels, but '{source}' exists in packed texture {i}.",
                        processed_def.channel_count
                    ));
                    continue;
                }

                texture.channels[c] = Some(PackedChannelInfo {
                    processed_texture: name.to_string(),
                    processed_channel: channel,
                    encoding: processed_def.encoding,
                });
                texture.channel_encodings |= processed_def.encoding;

                if c < 3 && !processed_def.encoding.contains(ChannelEncoding::SRGB) {
                    texture.hardware_srgb = false;
                }

                if first_source {
                    texture.flags = processed_def.flags;
                    first_source = false;
                } else if texture.flags != processed_def.flags {
                    info.error(format!(
                        "Not all sources in packed texture {i} share the same texture type."
                    ));
                }

                info.sources.insert(source.clone(), (i, c));
            }

            if texture.flags.contains(TextureFlags::ARRAY) && def.virtual_texture_streaming {
                info.error(format!(
                    "Derived texture {i} cannot be a virtual texture and Texture2DArray."
                ));
            }
            if def.compression == CompressionFormat::NormalMap && def.virtual_texture_streaming {
                info.error(format!(
                    "Derived texture {i} cannot be a virtual texture and normalmap format."
                ));
            }

            texture.channel_count = def.sources().len();
            info.infos.push(texture);
        }

        for name in unpacked_channel_names(defs, processed) {
            info.error(format!("\"{name}\" is unused, did you forget to pack it?"));
        }

        if !info.errors.is_empty() {
            tracing::debug!("packing: {} errors", info.errors.len());
        }
        info
    }

    fn error(&mut self, message: String) {
        self.errors.push(PackingError::new(message));
    }

    /// Number of packed textures.
    pub fn num_textures(&self) -> usize {
        self.defs.len()
    }

    /// Definition of packed texture `index`.
    pub fn texture_def(&self, index: usize) -> &PackedTextureDef {
        &self.defs[index]
    }

    /// Resolved layout of packed texture `index`.
    pub fn texture_info(&self, index: usize) -> &PackedTextureInfo {
        &self.infos[index]
    }

    /// Every definition, in order.
    pub fn defs(&self) -> &[PackedTextureDef] {
        &self.defs
    }

    /// Every resolved layout, in order.
    pub fn infos(&self) -> &[PackedTextureInfo] {
        &self.infos
    }

    /// `(texture, channel)` that `"Name.ch"` was packed into.
    pub fn packing_source(&self, source: &str) -> Option<(usize, usize)> {
        self.sources.get(source).copied()
    }

    /// Validation messages, in discovery order.
    pub fn errors(&self) -> &[PackingError] {
        &self.errors
    }

    /// True when there are no errors.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Processed channels no packed texture names, in name order.
pub fn unpacked_channel_names(
    defs: &[PackedTextureDef],
    processed: &BTreeMap<String, TextureDef>,
) -> Vec<String> {
    let packed: Vec<&str> = defs
        .iter()
        .flat_map(|def| def.sources.iter().flatten())
        .map(String::as_str)
        .collect();

    let mut unpacked = Vec::new();
    for (name, def) in processed {
        for suffix in &CHANNEL_SUFFIXES[..usize::from(def.channel_count).min(4)] {
            let channel = format!("{name}{suffix}");
            if !packed.contains(&channel.as_str()) {
                unpacked.push(channel);
            }
        }
    }
    unpacked
}

/// Shader parameter of packed texture `index`: `TEXSET_{param}_PACKED_{index}`.
pub fn texture_parameter_name(parameter: &str, index: usize) -> String {
    format!("{PARAMETER_PREFIX}{parameter}_PACKED_{index}")
}

/// Shader parameter of a constant: `TEXSET_{param}_{constant}`.
pub fn constant_parameter_name(parameter: &str, constant: &str) -> String {
    format!("{PARAMETER_PREFIX}{parameter}_{constant}")
}

/// True for names produced by the helpers above (case-insensitive prefix).
pub fn is_texture_set_parameter_name(name: &str) -> bool {
    name.get(..PARAMETER_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(PARAMETER_PREFIX))
}
