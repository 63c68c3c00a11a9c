//! Source textures backed by image files.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use image::DynamicImage;
use texset_core::{HashBuilder, PixelFormat, SourceError, SourceImage, SourceTexture, UVec3};

/// An image file read on demand.
///
/// The content id hashes the path, byte length and modification time, so an
/// edited file invalidates its builds without being decoded.
#[derive(Debug, Clone)]
pub struct ImageFileSource {
    path: PathBuf,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceTexture for ImageFileSource {
    fn content_id(&self) -> Option<String> {
        let meta = std::fs::metadata(&self.path).ok()?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as u64);
        let mut builder = HashBuilder::new();
        builder
            .write_str(&self.path.to_string_lossy())
            .write_u64(meta.len())
            .write_u64(modified);
        Some(builder.finish().to_hex())
    }

    fn dimensions(&self) -> Result<UVec3, SourceError> {
        let (width, height) = image::image_dimensions(&self.path)
            .map_err(|e| SourceError::Load(format!("{}: {e}", self.path.display())))?;
        Ok(UVec3::new(width as usize, height as usize, 1))
    }

    fn load(&self) -> Result<SourceImage, SourceError> {
        let bytes = std::fs::read(&self.path).map_err(|e| SourceError::read_file(&self.path, e))?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| SourceError::Load(format!("{}: {e}", self.path.display())))?;
        Ok(to_source_image(decoded))
    }
}

/// Converts a decoded image to the nearest [`PixelFormat`].
///
/// 8-bit colour is treated as sRGB, 8-bit gray as linear.
pub fn to_source_image(image: DynamicImage) -> SourceImage {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let (format, srgb, data) = match image {
        DynamicImage::ImageLuma8(gray) => (PixelFormat::G8, false, gray.into_raw()),
        DynamicImage::ImageLuma16(gray) => (
            PixelFormat::G16,
            false,
            gray.into_raw().iter().flat_map(|v| v.to_le_bytes()).collect(),
        ),
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => (
            PixelFormat::Rgba32F,
            false,
            image
                .to_rgba32f()
                .into_raw()
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
        ),
        DynamicImage::ImageLumaA16(_) | DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => (
            PixelFormat::Rgba16,
            false,
            image
                .to_rgba16()
                .into_raw()
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
        ),
        other => {
            let mut bgra = other.to_rgba8().into_raw();
            for px in bgra.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            (PixelFormat::Bgra8, true, bgra)
        }
    };
    SourceImage {
        width,
        height,
        slices: 1,
        format,
        srgb,
        data,
    }
}
