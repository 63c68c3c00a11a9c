//! Content hashing for graph structure and data identity.
//!
//! Nodes fold their type name, static configuration and upstream nodes into a
//! [`HashBuilder`]; the finished digest is a [`DataId`]. Every write is
//! type-tagged and strings are length-prefixed, so `("ab", "c")` and
//! `("a", "bc")` never collide.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 256-bit content identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId([u8; 32]);

impl DataId {
    /// The all-zero id, used for data that has never been built.
    pub const NONE: Self = Self([0; 32]);

    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns true for [`DataId::NONE`].
    pub fn is_none(&self) -> bool {
        self.0 == [0; 32]
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataId({})", &self.to_hex()[..16])
    }
}

/// Error returned when parsing a [`DataId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid data id '{0}': expected 64 hex digits")]
pub struct ParseDataIdError(pub String);

impl FromStr for DataId {
    type Err = ParseDataIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s)
            .map(|h| Self(*h.as_bytes()))
            .map_err(|_| ParseDataIdError(s.to_string()))
    }
}

impl Serialize for DataId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DataId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher with typed writes.
#[derive(Clone, Default)]
pub struct HashBuilder {
    hasher: blake3::Hasher,
}

impl HashBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn tagged(&mut self, tag: u8, bytes: &[u8]) -> &mut Self {
        self.hasher.update(&[tag]);
        self.hasher.update(bytes);
        self
    }

    /// Writes a length-prefixed string.
    pub fn write_str(&mut self, value: &str) -> &mut Self {
        self.tagged(b's', &(value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    /// Writes a `u32`.
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.tagged(b'u', &value.to_le_bytes())
    }

    /// Writes a `u64`.
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.tagged(b'U', &value.to_le_bytes())
    }

    /// Writes an `i32`.
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.tagged(b'i', &value.to_le_bytes())
    }

    /// Writes a `usize` as 64 bits so ids match across targets.
    pub fn write_usize(&mut self, value: usize) -> &mut Self {
        self.write_u64(value as u64)
    }

    /// Writes an `f32` by bit pattern.
    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.tagged(b'f', &value.to_bits().to_le_bytes())
    }

    /// Writes a bool.
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.tagged(b'b', &[u8::from(value)])
    }

    /// Writes an existing id.
    pub fn write_id(&mut self, value: &DataId) -> &mut Self {
        self.tagged(b'h', &value.0)
    }

    /// Marks an absent optional value.
    pub fn write_none(&mut self) -> &mut Self {
        self.tagged(b'n', &[])
    }

    /// Writes any [`Hashable`] value.
    pub fn write<T: Hashable + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.hash_into(self);
        self
    }

    /// Finalizes the digest.
    pub fn finish(&self) -> DataId {
        DataId(*self.hasher.finalize().as_bytes())
    }
}

/// Types that know how to fold themselves into a [`HashBuilder`].
pub trait Hashable {
    /// Writes this value into `builder`.
    fn hash_into(&self, builder: &mut HashBuilder);
}

impl Hashable for str {
    fn hash_into(&self, builder: &mut HashBuilder) {
        builder.write_str(self);
    }
}

impl Hashable for String {
    fn hash_into(&self, builder: &mut HashBuilder) {
        builder.write_str(self);
    }
}

impl Hashable for f32 {
    fn hash_into(&self, builder: &mut HashBuilder) {
        builder.write_f32(*self);
    }
}

impl Hashable for bool {
    fn hash_into(&self, builder: &mut HashBuilder) {
        builder.write_bool(*self);
    }
}

impl Hashable for u32 {
    fn hash_into(&self, builder: &mut HashBuilder) {
        builder.write_u32(*self);
    }
}

impl Hashable for DataId {
    fn hash_into(&self, builder: &mut HashBuilder) {
        builder.write_id(self);
    }
}

impl<T: Hashable> Hashable for [T] {
    fn hash_into(&self, builder: &mut HashBuilder) {
        builder.write_usize(self.len());
        for item in self {
            item.hash_into(builder);
        }
    }
}

impl<T: Hashable, const N: usize> Hashable for [T; N] {
    fn hash_into(&self, builder: &mut HashBuilder) {
        for item in self {
            item.hash_into(builder);
        }
    }
}

impl<T: Hashable> Hashable for Option<T> {
    fn hash_into(&self, builder: &mut HashBuilder) {
        match self {
            Some(value) => value.hash_into(builder),
            None => {
                builder.write_none();
            }
        }
    }
}
