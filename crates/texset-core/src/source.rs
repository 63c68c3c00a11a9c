//! Source images and the providers that resolve them by name.
//!
//! A [`SourceTexture`] is the host's handle to an authored image: it reports a
//! cheap content id without decoding and loads raw pixel data on demand.
//! Raw data arrives in one of the [`PixelFormat`] storage layouts and is
//! decoded to linear RGBA `f32` by [`SourceImage::decode`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, SourceError};
use crate::tile::UVec3;

/// Storage layout of raw source pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit gray.
    G8,
    /// 16-bit unsigned normalized gray.
    G16,
    /// 16-bit float red.
    R16F,
    /// 32-bit float red.
    R32F,
    /// 8-bit BGRA.
    Bgra8,
    /// 8-bit BGR with shared exponent in alpha (RGBE).
    Bgre8,
    /// 16-bit unsigned normalized RGBA.
    Rgba16,
    /// 16-bit float RGBA.
    Rgba16F,
    /// 32-bit float RGBA.
    Rgba32F,
    /// A host format this decoder has no layout for.
    Other(u32),
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> Result<usize, DecodeError> {
        match self {
            Self::G8 => Ok(1),
            Self::G16 | Self::R16F => Ok(2),
            Self::R32F | Self::Bgra8 | Self::Bgre8 => Ok(4),
            Self::Rgba16 | Self::Rgba16F => Ok(8),
            Self::Rgba32F => Ok(16),
            Self::Other(_) => Err(DecodeError::UnsupportedFormat(self)),
        }
    }

    /// Channels that carry independent data.
    pub fn valid_channels(self) -> Result<u8, DecodeError> {
        match self {
            Self::G8 | Self::G16 | Self::R16F | Self::R32F => Ok(1),
            Self::Bgre8 | Self::Bgra8 | Self::Rgba16 | Self::Rgba16F | Self::Rgba32F => Ok(4),
            Self::Other(_) => Err(DecodeError::UnsupportedFormat(self)),
        }
    }
}

/// Selects which source channels feed a processed texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask(u8);

impl ChannelMask {
    /// Red.
    pub const R: Self = Self(1);
    /// Green.
    pub const G: Self = Self(2);
    /// Blue.
    pub const B: Self = Self(4);
    /// Alpha.
    pub const A: Self = Self(8);
    /// All four channels.
    pub const ALL: Self = Self(0xF);

    /// Builds a mask from raw bits.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0xF)
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if `channel` (0..4) is selected.
    pub const fn has(self, channel: u8) -> bool {
        channel < 4 && self.0 & (1 << channel) != 0
    }
}

impl Default for ChannelMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl core::ops::BitOr for ChannelMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Maps processed channels onto the masked channels of a source.
///
/// Starts at the first selected channel and advances to the next selected one
/// after each output channel; once the valid channels run out the last
/// selected channel repeats.
pub fn channel_swizzle(mask: ChannelMask, valid_channels: u8, channel_count: u8) -> [u8; 4] {
    let mut swizzle = [0, 1, 2, 3];
    let mut current = 0u8;

    while current + 1 < valid_channels && !mask.has(current) {
        current += 1;
    }

    for slot in swizzle.iter_mut().take(usize::from(channel_count.min(4))) {
        *slot = current;
        if let Some(next) = (current + 1..valid_channels).find(|&c| mask.has(c)) {
            current = next;
        }
    }

    swizzle
}

/// Raw pixel data as stored by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceImage {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Slice count.
    pub slices: usize,
    /// Storage layout.
    pub format: PixelFormat,
    /// 8-bit colour data is sRGB encoded.
    pub srgb: bool,
    /// Tightly packed pixels, slice-major then row-major.
    pub data: Vec<u8>,
}

impl SourceImage {
    /// Size in pixels.
    pub fn size(&self) -> UVec3 {
        UVec3::new(self.width, self.height, self.slices)
    }

    /// Decodes to linear RGBA `f32`.
    ///
    /// Gray formats replicate into RGB with alpha 1.
    pub fn decode(&self) -> Result<LinearImage, DecodeError> {
        let bpp = self.format.bytes_per_pixel()?;
        let pixel_count = self.size().product();
        let expected = pixel_count * bpp;
        if self.data.len() != expected {
            return Err(DecodeError::SizeMismatch {
                format: self.format,
                size: self.size(),
                expected,
                actual: self.data.len(),
            });
        }

        let mut pixels = Vec::with_capacity(pixel_count * 4);
        let unorm8 = |b: u8, srgb: bool| {
            let v = f32::from(b) / 255.0;
            if srgb { srgb_to_linear(v) } else { v }
        };
        let unorm16 = |b: &[u8]| f32::from(u16::from_le_bytes([b[0], b[1]])) / 65535.0;
        let float16 = |b: &[u8]| half::f16::from_le_bytes([b[0], b[1]]).to_f32();
        let float = |b: &[u8]| f32::from_le_bytes([b[0], b[1], b[2], b[3]]);

        for px in self.data.chunks_exact(bpp) {
            let rgba = match self.format {
                PixelFormat::G8 => {
                    let v = unorm8(px[0], self.srgb);
                    [v, v, v, 1.0]
                }
                PixelFormat::G16 => {
                    let v = unorm16(px);
                    [v, v, v, 1.0]
                }
                PixelFormat::R16F => {
                    let v = float16(px);
                    [v, v, v, 1.0]
                }
                PixelFormat::R32F => {
                    let v = float(px);
                    [v, v, v, 1.0]
                }
                PixelFormat::Bgra8 => [
                    unorm8(px[2], self.srgb),
                    unorm8(px[1], self.srgb),
                    unorm8(px[0], self.srgb),
                    unorm8(px[3], false),
                ],
                PixelFormat::Bgre8 => rgbe_to_linear(px[2], px[1], px[0], px[3]),
                PixelFormat::Rgba16 => [
                    unorm16(&px[0..2]),
                    unorm16(&px[2..4]),
                    unorm16(&px[4..6]),
                    unorm16(&px[6..8]),
                ],
                PixelFormat::Rgba16F => [
                    float16(&px[0..2]),
                    float16(&px[2..4]),
                    float16(&px[4..6]),
                    float16(&px[6..8]),
                ],
                PixelFormat::Rgba32F => [
                    float(&px[0..4]),
                    float(&px[4..8]),
                    float(&px[8..12]),
                    float(&px[12..16]),
                ],
                PixelFormat::Other(_) => return Err(DecodeError::UnsupportedFormat(self.format)),
            };
            pixels.extend_from_slice(&rgba);
        }

        Ok(LinearImage {
            size: self.size(),
            pixels,
        })
    }

    /// Builds an `Rgba32F` image from linear RGBA values.
    pub fn from_rgba32f(size: UVec3, rgba: &[f32]) -> Self {
        let data = rgba.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self {
            width: size.x,
            height: size.y,
            slices: size.z,
            format: PixelFormat::Rgba32F,
            srgb: false,
            data,
        }
    }

    /// Builds an `R32F` image from single-channel values.
    pub fn from_r32f(size: UVec3, values: &[f32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self {
            width: size.x,
            height: size.y,
            slices: size.z,
            format: PixelFormat::R32F,
            srgb: false,
            data,
        }
    }
}

/// Decoded linear RGBA image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearImage {
    /// Size in pixels.
    pub size: UVec3,
    /// Interleaved RGBA, slice-major then row-major.
    pub pixels: Vec<f32>,
}

impl LinearImage {
    /// Component `channel` of the pixel at `coord`.
    #[inline]
    pub fn component(&self, coord: UVec3, channel: u8) -> f32 {
        let index = (coord.z * self.size.y + coord.y) * self.size.x + coord.x;
        self.pixels[index * 4 + usize::from(channel)]
    }
}

/// sRGB transfer function, encoded to linear.
pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn rgbe_to_linear(r: u8, g: u8, b: u8, e: u8) -> [f32; 4] {
    if e == 0 {
        return [0.0, 0.0, 0.0, 1.0];
    }
    let scale = 2f32.powi(i32::from(e) - 128) / 255.0;
    [
        f32::from(r) * scale,
        f32::from(g) * scale,
        f32::from(b) * scale,
        1.0,
    ]
}

/// Host handle to an authored source image.
pub trait SourceTexture: Send + Sync {
    /// Cheap identity of the pixel payload; `None` if the handle is empty.
    fn content_id(&self) -> Option<String>;

    /// Size of mip 0 without decoding pixel data.
    fn dimensions(&self) -> Result<UVec3, SourceError>;

    /// Loads the raw pixels.
    fn load(&self) -> Result<SourceImage, SourceError>;
}

/// In-memory source texture with a content id derived from its bytes.
#[derive(Clone, Debug)]
pub struct MemorySource {
    image: SourceImage,
    content_id: String,
}

impl MemorySource {
    /// Wraps an image, hashing its layout and bytes for the content id.
    pub fn new(image: SourceImage) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("{:?}:{}:{}", image.format, image.size(), image.srgb).as_bytes());
        hasher.update(&image.data);
        let content_id = hasher.finalize().to_hex().to_string();
        Self { image, content_id }
    }

    /// Wraps an image with an explicit content id.
    pub fn with_content_id(image: SourceImage, content_id: impl Into<String>) -> Self {
        Self {
            image,
            content_id: content_id.into(),
        }
    }
}

impl SourceTexture for MemorySource {
    fn content_id(&self) -> Option<String> {
        Some(self.content_id.clone())
    }

    fn dimensions(&self) -> Result<UVec3, SourceError> {
        Ok(self.image.size())
    }

    fn load(&self) -> Result<SourceImage, SourceError> {
        Ok(self.image.clone())
    }
}

/// A source texture plus the channels to read from it.
#[derive(Clone)]
pub struct SourceTextureRef {
    /// Host handle.
    pub texture: Arc<dyn SourceTexture>,
    /// Channels selected for reading.
    pub channel_mask: ChannelMask,
}

impl SourceTextureRef {
    /// References every channel of `texture`.
    pub fn new(texture: Arc<dyn SourceTexture>) -> Self {
        Self {
            texture,
            channel_mask: ChannelMask::ALL,
        }
    }

    /// Restricts the reference to `mask`.
    pub fn with_mask(mut self, mask: ChannelMask) -> Self {
        self.channel_mask = mask;
        self
    }
}

impl core::fmt::Debug for SourceTextureRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SourceTextureRef")
            .field("content_id", &self.texture.content_id())
            .field("channel_mask", &self.channel_mask)
            .finish()
    }
}

/// Resolves named sources for one build.
pub trait SourceProvider: Send + Sync {
    /// Returns true if a source is bound to `name`.
    fn has_named_source(&self, name: &str) -> bool;

    /// The source bound to `name`.
    fn named_source(&self, name: &str) -> Option<SourceTextureRef>;

    /// Cheap identity check that avoids a full decode.
    fn source_content_id(&self, source: &SourceTextureRef) -> Option<String> {
        source.texture.content_id()
    }
}

/// Name-to-source map; the stock [`SourceProvider`].
#[derive(Clone, Debug, Default)]
pub struct SourceTextures {
    sources: BTreeMap<String, SourceTextureRef>,
}

impl SourceTextures {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `source` to `name`, replacing any previous binding.
    pub fn insert(&mut self, name: impl Into<String>, source: SourceTextureRef) -> &mut Self {
        self.sources.insert(name.into(), source);
        self
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, source: SourceTextureRef) -> Self {
        self.insert(name, source);
        self
    }

    /// Removes the binding for `name`.
    pub fn remove(&mut self, name: &str) -> Option<SourceTextureRef> {
        self.sources.remove(name)
    }

    /// Bound names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl SourceProvider for SourceTextures {
    fn has_named_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    fn named_source(&self, name: &str) -> Option<SourceTextureRef> {
        self.sources.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- decoding ---

    #[test]
    fn decode_bgra8_swaps_to_rgba() {
        let image = SourceImage {
            width: 1,
            height: 1,
            slices: 1,
            format: PixelFormat::Bgra8,
            srgb: false,
            data: vec![0, 51, 255, 255],
        };
        let linear = image.decode().unwrap();
        assert_eq!(linear.pixels, vec![1.0, 0.2, 0.0, 1.0]);
    }

    #[test]
    fn decode_srgb_g8_linearizes() {
        let image = SourceImage {
            width: 2,
            height: 1,
            slices: 1,
            format: PixelFormat::G8,
            srgb: true,
            data: vec![0, 255],
        };
        let linear = image.decode().unwrap();
        assert_eq!(linear.component(UVec3::new(0, 0, 0), 0), 0.0);
        assert!((linear.component(UVec3::new(1, 0, 0), 2) - 1.0).abs() < 1e-6);
        assert_eq!(linear.component(UVec3::new(1, 0, 0), 3), 1.0);
    }

    #[test]
    fn decode_half_float() {
        let data: Vec<u8> = [0.5f32, -2.0]
            .iter()
            .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
            .collect();
        let image = SourceImage {
            width: 2,
            height: 1,
            slices: 1,
            format: PixelFormat::R16F,
            srgb: false,
            data,
        };
        let linear = image.decode().unwrap();
        assert_eq!(linear.component(UVec3::new(0, 0, 0), 0), 0.5);
        assert_eq!(linear.component(UVec3::new(1, 0, 0), 0), -2.0);
    }

    #[test]
    fn unknown_format_is_an_error() {
        let image = SourceImage {
            width: 1,
            height: 1,
            slices: 1,
            format: PixelFormat::Other(42),
            srgb: false,
            data: vec![0; 4],
        };
        assert!(matches!(
            image.decode(),
            Err(DecodeError::UnsupportedFormat(PixelFormat::Other(42)))
        ));
    }

    #[test]
    fn short_buffer_is_an_error() {
        let image = SourceImage::from_r32f(UVec3::new(2, 2, 1), &[0.0; 3]);
        assert!(matches!(
            image.decode(),
            Err(DecodeError::SizeMismatch { expected: 16, actual: 12, .. })
        ));
    }

    // --- swizzle ---

    #[test]
    fn swizzle_full_mask_is_identity() {
        assert_eq!(channel_swizzle(ChannelMask::ALL, 4, 4), [0, 1, 2, 3]);
    }

    #[test]
    fn swizzle_skips_unselected_channels() {
        let mask = ChannelMask::G | ChannelMask::A;
        assert_eq!(channel_swizzle(mask, 4, 2), [1, 3, 2, 3]);
    }

    #[test]
    fn swizzle_single_channel_source_repeats() {
        assert_eq!(channel_swizzle(ChannelMask::ALL, 1, 3), [0, 0, 0, 3]);
    }

    // --- providers ---

    #[test]
    fn memory_source_content_id_tracks_bytes() {
        let a = MemorySource::new(SourceImage::from_r32f(UVec3::ONE, &[0.25]));
        let b = MemorySource::new(SourceImage::from_r32f(UVec3::ONE, &[0.5]));
        assert_ne!(a.content_id(), b.content_id());
    }

    #[test]
    fn source_textures_lookup() {
        let source = Arc::new(MemorySource::new(SourceImage::from_r32f(UVec3::ONE, &[1.0])));
        let textures = SourceTextures::new().with("Height", SourceTextureRef::new(source));
        assert!(textures.has_named_source("Height"));
        assert!(!textures.has_named_source("Normal"));
        let found = textures.named_source("Height").unwrap();
        assert!(textures.source_content_id(&found).is_some());
    }
}
