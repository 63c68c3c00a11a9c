//! Scheduler configuration.
//!
//! ```toml
//! async_compilation = true
//! worker_threads = 8
//! max_seconds_per_tick = 0.016
//! per_compile_memory_estimate = 1073741824
//! cache_dir = "target/texset-cache"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One gibibyte.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Settings for a [`CompilingManager`](crate::CompilingManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Compile on the worker pool instead of the calling thread.
    pub async_compilation: bool,

    /// Worker pool size.
    pub worker_threads: usize,

    /// Soft budget for finalizing tasks in one `process_pending` call.
    pub max_seconds_per_tick: f64,

    /// Bytes one compile is assumed to hold at peak.
    pub per_compile_memory_estimate: u64,

    /// Available memory override, in bytes. Read from the system when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_memory: Option<u64>,

    /// Directory of the persistent build cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            async_compilation: true,
            worker_threads: std::thread::available_parallelism().map_or(4, |n| n.get()),
            max_seconds_per_tick: 0.016,
            per_compile_memory_estimate: GIB,
            available_memory: None,
            cache_dir: None,
        }
    }
}

impl ManagerConfig {
    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: ManagerConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the config to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
    }

    /// Convert the config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::invalid_value(
                "worker_threads",
                "must be at least 1",
            ));
        }
        if self.per_compile_memory_estimate == 0 {
            return Err(ConfigError::invalid_value(
                "per_compile_memory_estimate",
                "must be non-zero",
            ));
        }
        if self.max_seconds_per_tick.is_nan() || self.max_seconds_per_tick < 0.0 {
            return Err(ConfigError::invalid_value(
                "max_seconds_per_tick",
                format!("{} is not a non-negative number", self.max_seconds_per_tick),
            ));
        }
        Ok(())
    }

    /// Set whether compiles run on the pool.
    pub fn with_async_compilation(mut self, enabled: bool) -> Self {
        self.async_compilation = enabled;
        self
    }

    /// Set the worker pool size.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Set the per-tick finalize budget.
    pub fn with_max_seconds_per_tick(mut self, seconds: f64) -> Self {
        self.max_seconds_per_tick = seconds;
        self
    }

    /// Set the per-compile memory estimate.
    pub fn with_per_compile_memory_estimate(mut self, bytes: u64) -> Self {
        self.per_compile_memory_estimate = bytes.max(1);
        self
    }

    /// Override the available memory.
    pub fn with_available_memory(mut self, bytes: u64) -> Self {
        self.available_memory = Some(bytes);
        self
    }

    /// Set the persistent cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Compiles that fit in memory at once, at least one. Unbounded when the
    /// available memory is unknown.
    pub fn memory_budget(&self) -> usize {
        match self.available_memory.or_else(system_available_memory) {
            Some(bytes) => {
                let fits = bytes / self.per_compile_memory_estimate.max(1);
                usize::try_from(fits).unwrap_or(usize::MAX).max(1)
            }
            None => usize::MAX,
        }
    }

    /// Largest number of compiles kept in flight.
    pub fn concurrency_limit(&self) -> usize {
        (self.worker_threads / 2).max(1).min(self.memory_budget())
    }
}

/// `MemAvailable` from `/proc/meminfo`, in bytes.
pub fn system_available_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))?;
    let mut fields = line.split_whitespace().skip(1);
    let value: u64 = fields.next()?.parse().ok()?;
    let scale = if fields.next() == Some("kB") { 1024 } else { 1 };
    Some(value * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- defaults and builders ---

    #[test]
    fn defaults() {
        let config = ManagerConfig::default();
        assert!(config.async_compilation);
        assert!(config.worker_threads >= 1);
        assert_eq!(config.per_compile_memory_estimate, GIB);
        assert!((config.max_seconds_per_tick - 0.016).abs() < 1e-12);
    }

    #[test]
    fn concurrency_is_bounded_by_workers_and_memory() {
        let config = ManagerConfig::default()
            .with_worker_threads(8)
            .with_available_memory(2 * GIB);
        assert_eq!(config.memory_budget(), 2);
        assert_eq!(config.concurrency_limit(), 2);

        let config = config.with_available_memory(64 * GIB);
        assert_eq!(config.concurrency_limit(), 4);

        let tiny = ManagerConfig::default()
            .with_worker_threads(1)
            .with_available_memory(1);
        assert_eq!(tiny.concurrency_limit(), 1);
    }

    // --- TOML ---

    #[test]
    fn toml_round_trip() {
        let config = ManagerConfig::default()
            .with_worker_threads(6)
            .with_available_memory(3 * GIB)
            .with_cache_dir("/tmp/texset");
        let text = config.to_toml().unwrap();
        assert_eq!(ManagerConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config = ManagerConfig::from_toml("worker_threads = 3").unwrap();
        assert_eq!(config.worker_threads, 3);
        assert!(config.async_compilation);
        assert_eq!(config.available_memory, None);
    }

    #[test]
    fn zero_workers_rejected() {
        let err = ManagerConfig::from_toml("worker_threads = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "worker_threads", .. }));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.toml");
        let config = ManagerConfig::default().with_async_compilation(false);
        config.save(&path).unwrap();
        assert_eq!(ManagerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn load_missing_file() {
        let err = ManagerConfig::load("/nonexistent/texset.toml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    // --- meminfo ---

    #[test]
    fn parses_mem_available() {
        let meminfo = "MemTotal:       32000000 kB\nMemFree:         1000 kB\nMemAvailable:   2048 kB\n";
        assert_eq!(parse_mem_available(meminfo), Some(2048 * 1024));
        assert_eq!(parse_mem_available("MemTotal: 5 kB\n"), None);
    }
}
