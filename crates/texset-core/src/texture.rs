//! Processed texture definitions and dimensions.

use core::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::hash::{HashBuilder, Hashable};
use crate::tile::UVec3;

macro_rules! bit_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr;)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u8);

        impl $name {
            /// No bits set.
            pub const NONE: Self = Self(0);
            $($(#[$fmeta])* pub const $flag: Self = Self($bit);)*

            /// Raw bit pattern.
            #[inline]
            pub const fn bits(self) -> u8 {
                self.0
            }

            /// Builds a set from a raw bit pattern.
            #[inline]
            pub const fn from_bits(bits: u8) -> Self {
                Self(bits)
            }

            /// Returns true if every bit of `other` is set.
            #[inline]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns true if no bits are set.
            #[inline]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }
    };
}

bit_set! {
    /// How a processed channel is encoded when packed.
    ChannelEncoding {
        /// Rescale to 0..1 using the build-time min/max; the inverse is
        /// emitted as shader constants.
        RANGE_COMPRESSION = 1;
        /// Values are linear colour and are stored sRGB-encoded.
        SRGB = 2;
    }
}

bit_set! {
    /// Layout flags of a processed texture.
    TextureFlags {
        /// Slices are independent array layers rather than a volume.
        ARRAY = 1;
    }
}

/// Shape and encoding of a processed texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureDef {
    /// Number of meaningful channels, 1 to 4.
    pub channel_count: u8,
    /// Encoding applied when the texture is packed.
    pub encoding: ChannelEncoding,
    /// Layout flags.
    pub flags: TextureFlags,
}

impl TextureDef {
    /// Creates a definition with no flags.
    pub const fn new(channel_count: u8, encoding: ChannelEncoding) -> Self {
        Self {
            channel_count,
            encoding,
            flags: TextureFlags::NONE,
        }
    }

    /// Slices are treated as a volume unless the texture is an array.
    #[inline]
    pub fn is_volume(&self) -> bool {
        !self.flags.contains(TextureFlags::ARRAY)
    }
}

impl Hashable for TextureDef {
    fn hash_into(&self, builder: &mut HashBuilder) {
        builder
            .write_u32(u32::from(self.channel_count))
            .write_u32(u32::from(self.encoding.bits()))
            .write_u32(u32::from(self.flags.bits()));
    }
}

/// A processed texture definition plus the value used when no source exists.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceTextureDef {
    /// Channel layout of the processed texture.
    pub def: TextureDef,
    /// Fill value per channel for missing or unreadable sources.
    pub default_value: [f32; 4],
}

impl SourceTextureDef {
    /// Creates a source definition.
    pub const fn new(def: TextureDef, default_value: [f32; 4]) -> Self {
        Self { def, default_value }
    }
}

impl Hashable for SourceTextureDef {
    fn hash_into(&self, builder: &mut HashBuilder) {
        builder.write(&self.def).write(&self.default_value);
    }
}

/// Size and mip count of a texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureDimension {
    /// Width of mip 0.
    pub width: usize,
    /// Height of mip 0.
    pub height: usize,
    /// Slice count of mip 0.
    pub slices: usize,
    /// Number of mips.
    pub mips: usize,
}

impl TextureDimension {
    /// Creates a dimension.
    pub const fn new(width: usize, height: usize, slices: usize, mips: usize) -> Self {
        Self {
            width,
            height,
            slices,
            mips,
        }
    }

    /// Mip 0 size as a vector.
    pub fn size(&self) -> UVec3 {
        UVec3::new(self.width, self.height, self.slices)
    }

    /// Size of `mip`. Slices only shrink for volumes.
    pub fn mip_size(&self, mip: usize, is_volume: bool) -> UVec3 {
        UVec3::new(
            (self.width >> mip).max(1),
            (self.height >> mip).max(1),
            if is_volume {
                (self.slices >> mip).max(1)
            } else {
                self.slices
            },
        )
    }

    /// Mip count of a complete chain down to 1x1(x1).
    pub fn full_mip_count(&self, is_volume: bool) -> usize {
        full_mip_count(self.width, self.height, if is_volume { self.slices } else { 1 })
    }

    /// Width over height, or `None` for degenerate sizes.
    pub fn aspect_ratio(&self) -> Option<f32> {
        (self.width > 0 && self.height > 0).then(|| self.width as f32 / self.height as f32)
    }
}

/// `1 + floor(log2(max(w, h, d)))`.
pub fn full_mip_count(width: usize, height: usize, depth: usize) -> usize {
    let largest = width.max(height).max(depth).max(1);
    (usize::BITS - largest.leading_zeros()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mip_count_matches_log2() {
        assert_eq!(full_mip_count(1, 1, 1), 1);
        assert_eq!(full_mip_count(2, 1, 1), 2);
        assert_eq!(full_mip_count(64, 64, 1), 7);
        assert_eq!(full_mip_count(100, 3, 1), 7);
        assert_eq!(full_mip_count(4, 4, 16), 5);
    }

    #[test]
    fn array_slices_do_not_shrink() {
        let dim = TextureDimension::new(16, 8, 6, 5);
        assert_eq!(dim.mip_size(2, false), UVec3::new(4, 2, 6));
        assert_eq!(dim.mip_size(2, true), UVec3::new(4, 2, 1));
        assert_eq!(dim.mip_size(10, false), UVec3::new(1, 1, 6));
    }

    #[test]
    fn volume_flag() {
        let mut def = TextureDef::new(1, ChannelEncoding::NONE);
        assert!(def.is_volume());
        def.flags |= TextureFlags::ARRAY;
        assert!(!def.is_volume());
    }

    #[test]
    fn encoding_bits() {
        let e = ChannelEncoding::RANGE_COMPRESSION | ChannelEncoding::SRGB;
        assert!(e.contains(ChannelEncoding::SRGB));
        assert_eq!(e.bits(), 3);
        assert!(ChannelEncoding::NONE.is_empty());
    }
}
