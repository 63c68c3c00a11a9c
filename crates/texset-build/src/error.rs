//! Error types for build scheduling and configuration.

use std::path::PathBuf;

use texset_core::CompileError;
use thiserror::Error;

/// Errors that can occur while building a texture set.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A packed texture failed to compile.
    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),

    /// The job was cancelled before it ran.
    #[error("build of '{0}' was cancelled")]
    Cancelled(String),

    /// The worker went away without reporting a result.
    #[error("build of '{0}' ended without a result")]
    WorkerLost(String),

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create the cache directory.
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Path of the directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Create a spawn error.
    pub fn spawn(source: std::io::Error) -> Self {
        BuildError::Spawn { source }
    }

    /// Create a create directory error.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::CreateDir {
            path: path.into(),
            source,
        }
    }
}

/// Errors that can occur while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "mock")
    }

    // --- factory methods ---

    #[test]
    fn read_file_factory_keeps_path() {
        let err = ConfigError::read_file("/etc/texset.toml", mock_io_err());
        assert!(
            matches!(err, ConfigError::ReadFile { ref path, .. } if path == std::path::Path::new("/etc/texset.toml"))
        );
    }

    #[test]
    fn create_dir_factory_keeps_path() {
        let err = BuildError::create_dir("/cache", mock_io_err());
        assert!(matches!(err, BuildError::CreateDir { ref path, .. } if path == std::path::Path::new("/cache")));
    }

    // --- Display formatting ---

    #[test]
    fn invalid_value_display() {
        let err = ConfigError::invalid_value("worker_threads", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid value for 'worker_threads': must be at least 1"
        );
    }

    #[test]
    fn cancelled_display() {
        let err = BuildError::Cancelled("Rock".to_string());
        assert_eq!(err.to_string(), "build of 'Rock' was cancelled");
    }

    // --- Error::source() chain ---

    #[test]
    fn io_variants_expose_source() {
        assert!(ConfigError::write_file("/x", mock_io_err()).source().is_some());
        assert!(BuildError::spawn(mock_io_err()).source().is_some());
        assert!(BuildError::WorkerLost("x".to_string()).source().is_none());
    }
}
