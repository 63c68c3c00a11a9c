//! Error types for source decoding and compilation.

use std::path::PathBuf;

use thiserror::Error;

use crate::source::PixelFormat;
use crate::tile::UVec3;

/// A source could not be resolved or loaded.
///
/// Recoverable: the reading node fills its channels with the declared default.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No source is bound to the name.
    #[error("source '{0}' is not bound")]
    Missing(String),

    /// The host failed to produce pixel data.
    #[error("failed to load source: {0}")]
    Load(String),

    /// Reading a source file failed.
    #[error("failed to read source file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SourceError::ReadFile {
            path: path.into(),
            source,
        }
    }
}

/// Raw pixel data the decoder cannot interpret.
///
/// Fatal for the build: it signals a gap in the decode layer, not bad user data.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The storage format has no decoder.
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),

    /// The byte count does not match the declared size and format.
    #[error("{format:?} source of size {size} needs {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Declared format.
        format: PixelFormat,
        /// Declared size.
        size: UVec3,
        /// Bytes required by format and size.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
}

/// A packed texture failed to build.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A contributing source could not be decoded.
    #[error("packed texture {index} ('{name}'): {source}")]
    Decode {
        /// Packed texture index.
        index: usize,
        /// Derived texture name.
        name: String,
        /// Decoder failure.
        #[source]
        source: DecodeError,
    },

    /// The texture index is outside the packing definition.
    #[error("packed texture index {index} out of range (have {count})")]
    TextureIndex {
        /// Requested index.
        index: usize,
        /// Number of packed textures.
        count: usize,
    },

    /// The parameter name is not an output of the graph.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
}

impl CompileError {
    /// Create a decode error for packed texture `index`.
    pub fn decode(index: usize, name: impl Into<String>, source: DecodeError) -> Self {
        CompileError::Decode {
            index,
            name: name.into(),
            source,
        }
    }
}

/// One problem with a texture set definition.
///
/// Definition problems are collected, never raised: a definition with errors
/// still loads so every problem can be reported at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PackingError(pub String);

impl PackingError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        PackingError(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn source_error_display() {
        let err = SourceError::Missing("BaseColor".into());
        assert_eq!(err.to_string(), "source 'BaseColor' is not bound");
    }

    #[test]
    fn read_file_has_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "mock");
        let err = SourceError::read_file("/tmp/a.png", io);
        assert!(err.to_string().contains("/tmp/a.png"));
        assert!(err.source().is_some());
    }

    #[test]
    fn compile_error_chains_decode_error() {
        let err = CompileError::decode(
            1,
            "Rock_Texture_1",
            DecodeError::UnsupportedFormat(PixelFormat::Other(7)),
        );
        let msg = err.to_string();
        assert!(msg.contains("packed texture 1"));
        assert!(msg.contains("Other(7)"));
        assert!(err.source().is_some());
    }

    #[test]
    fn packing_error_is_its_message() {
        let err = PackingError::new("\"Mask.r\" is unused, did you forget to pack it?");
        assert_eq!(err.to_string(), "\"Mask.r\" is unused, did you forget to pack it?");
    }

    #[test]
    fn size_mismatch_display() {
        let err = DecodeError::SizeMismatch {
            format: PixelFormat::R32F,
            size: UVec3::new(2, 2, 1),
            expected: 16,
            actual: 12,
        };
        assert_eq!(err.to_string(), "R32F source of size 2x2x1 needs 16 bytes, got 12");
    }
}
