//! Tile descriptors: rectangular or volumetric sub-regions of a pixel buffer.
//!
//! A [`TileDescriptor`] pairs a region of a texture (`tile_offset`, `tile_size`
//! inside `texture_size`) with the layout of the buffer that region is written
//! to (`data_stride`, `data_offset`). The buffer layout is independent of the
//! texture: a tile can address a tile-local scratch buffer, one channel of an
//! interleaved RGBA mip, or a sub-rectangle of another tile's storage.
//!
//! # Iteration
//!
//! [`TileDescriptor::for_each_pixel`] walks z, then y, then x, advancing the
//! data index by precomputed step sizes rather than recomputing
//! `offset + coord * stride` for every pixel.
//!
//! # Example
//!
//! ```rust
//! use texset_core::tile::{TileDescriptor, UVec3};
//!
//! let size = UVec3::new(8, 8, 1);
//! let tile = TileDescriptor::new(
//!     size,
//!     UVec3::new(4, 4, 1),
//!     UVec3::new(4, 0, 0),
//!     TileDescriptor::compute_data_strides(1, size),
//!     TileDescriptor::compute_data_offset(UVec3::new(4, 0, 0), TileDescriptor::compute_data_strides(1, size)),
//! );
//! let mut visited = 0;
//! tile.for_each_pixel(|_| visited += 1);
//! assert_eq!(visited, 16);
//! ```

use core::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Unsigned 3-component vector used for sizes, offsets and strides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UVec3 {
    /// Width axis.
    pub x: usize,
    /// Height axis.
    pub y: usize,
    /// Slice axis.
    pub z: usize,
}

impl UVec3 {
    /// All components zero.
    pub const ZERO: Self = Self::new(0, 0, 0);
    /// All components one.
    pub const ONE: Self = Self::new(1, 1, 1);

    /// Creates a vector from its components.
    #[inline]
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Product of all components (pixel count for a size).
    #[inline]
    pub fn product(self) -> usize {
        self.x * self.y * self.z
    }

    /// Component-wise minimum.
    #[inline]
    pub fn component_min(self, other: Self) -> Self {
        Self::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    /// Component-wise maximum.
    #[inline]
    pub fn component_max(self, other: Self) -> Self {
        Self::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// Component-wise division rounding up.
    #[inline]
    pub fn div_ceil(self, other: Self) -> Self {
        Self::new(
            self.x.div_ceil(other.x),
            self.y.div_ceil(other.y),
            self.z.div_ceil(other.z),
        )
    }

    /// Returns true if every component is `<=` the matching component of `other`.
    #[inline]
    pub fn all_le(self, other: Self) -> bool {
        self.x <= other.x && self.y <= other.y && self.z <= other.z
    }

    /// Smallest component.
    #[inline]
    pub fn min_element(self) -> usize {
        self.x.min(self.y).min(self.z)
    }

    /// Component-wise saturating subtraction.
    #[inline]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self::new(
            self.x.saturating_sub(other.x),
            self.y.saturating_sub(other.y),
            self.z.saturating_sub(other.z),
        )
    }
}

impl Add for UVec3 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for UVec3 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul for UVec3 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.x * rhs.x, self.y * rhs.y, self.z * rhs.z)
    }
}

impl core::fmt::Display for UVec3 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Per-pixel state handed to [`TileDescriptor::for_each_pixel`] callbacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelContext {
    /// Coordinate relative to the tile origin.
    pub tile_coord: UVec3,
    /// Index into the tile's data buffer.
    pub data_index: usize,
}

/// A sub-region of a texture together with the layout of its data buffer.
///
/// Construction asserts that the tile fits inside the texture. Step sizes are
/// derived from the strides so that iteration never leaves the tile:
///
/// - `step.x = stride.x`
/// - `step.y = stride.y - stride.x * tile.x`
/// - `step.z = stride.z - stride.y * tile.y`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileDescriptor {
    /// Size of the full texture the tile lives in.
    pub texture_size: UVec3,
    /// Size of the tile.
    pub tile_size: UVec3,
    /// Tile origin inside the texture.
    pub tile_offset: UVec3,
    /// Element distance between neighbouring pixels along each axis.
    pub data_stride: UVec3,
    /// Index of the tile's first element in its data buffer.
    pub data_offset: usize,
    step: UVec3,
}

impl TileDescriptor {
    /// Creates a tile descriptor.
    ///
    /// # Panics
    ///
    /// Panics if `tile_offset + tile_size` exceeds `texture_size` on any axis,
    /// or if the strides cannot hold a tile row/plane.
    pub fn new(
        texture_size: UVec3,
        tile_size: UVec3,
        tile_offset: UVec3,
        data_stride: UVec3,
        data_offset: usize,
    ) -> Self {
        assert!(
            (tile_offset + tile_size).all_le(texture_size),
            "tile {tile_size} at {tile_offset} exceeds texture {texture_size}"
        );
        assert!(
            data_stride.y >= data_stride.x * tile_size.x
                && data_stride.z >= data_stride.y * tile_size.y,
            "data stride {data_stride} cannot hold tile {tile_size}"
        );

        let step = UVec3::new(
            data_stride.x,
            data_stride.y - data_stride.x * tile_size.x,
            data_stride.z - data_stride.y * tile_size.y,
        );

        Self {
            texture_size,
            tile_size,
            tile_offset,
            data_stride,
            data_offset,
            step,
        }
    }

    /// Tile covering an entire texture whose data buffer is laid out
    /// `element_stride` floats per pixel, starting at `data_offset`.
    pub fn whole(texture_size: UVec3, element_stride: usize, data_offset: usize) -> Self {
        Self::new(
            texture_size,
            texture_size,
            UVec3::ZERO,
            Self::compute_data_strides(element_stride, texture_size),
            data_offset,
        )
    }

    /// Tile whose data lives in a dense, single-channel buffer of exactly
    /// `tile_size` pixels.
    pub fn local(texture_size: UVec3, tile_size: UVec3, tile_offset: UVec3) -> Self {
        Self::new(
            texture_size,
            tile_size,
            tile_offset,
            Self::compute_data_strides(1, tile_size),
            0,
        )
    }

    /// Strides for a dense buffer of `dims` pixels with `element_stride`
    /// floats per pixel.
    #[inline]
    pub fn compute_data_strides(element_stride: usize, dims: UVec3) -> UVec3 {
        UVec3::new(
            element_stride,
            dims.x * element_stride,
            dims.y * dims.x * element_stride,
        )
    }

    /// Buffer index of `offset` for the given strides.
    #[inline]
    pub fn compute_data_offset(offset: UVec3, strides: UVec3) -> usize {
        offset.x * strides.x + offset.y * strides.y + offset.z * strides.z
    }

    /// Per-axis step applied after each pixel, row and plane.
    #[inline]
    pub fn step(&self) -> UVec3 {
        self.step
    }

    /// Number of pixels covered by the tile.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.tile_size.product()
    }

    /// Buffer index of a tile-relative coordinate.
    #[inline]
    pub fn tile_coord_to_data_index(&self, coord: UVec3) -> usize {
        self.data_offset + Self::compute_data_offset(coord, self.data_stride)
    }

    /// Smallest buffer length that holds every index this tile addresses.
    pub fn required_len(&self) -> usize {
        if self.tile_size.min_element() == 0 {
            return self.data_offset;
        }
        self.tile_coord_to_data_index(self.tile_size - UVec3::ONE) + 1
    }

    /// Visits every pixel of the tile in z, y, x order.
    pub fn for_each_pixel(&self, mut f: impl FnMut(PixelContext)) {
        let mut ctx = PixelContext {
            tile_coord: UVec3::ZERO,
            data_index: self.data_offset,
        };

        for z in 0..self.tile_size.z {
            ctx.tile_coord.z = z;
            for y in 0..self.tile_size.y {
                ctx.tile_coord.y = y;
                for x in 0..self.tile_size.x {
                    ctx.tile_coord.x = x;
                    f(ctx);
                    ctx.data_index += self.step.x;
                }
                ctx.data_index += self.step.y;
            }
            ctx.data_index += self.step.z;
        }
    }
}
