//! Content-addressed build cache.
//!
//! Keys are `{plugin}_{version}_{id}` where `id` is the compiler's data id
//! for one derived texture or parameter. The cache is advisory: a miss or an
//! I/O failure only means the value is rebuilt.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use texset_core::DataId;

use crate::error::BuildError;

/// Plugin name of derived texture and parameter entries.
pub const DERIVED_DATA_PLUGIN: &str = "TextureSet_FDerivedTextureData";

/// Version of derived texture entries.
pub const TEXTURE_DATA_VERSION: &str = "F956B1B9-3AD3-47B3-BD82-8826C71A3DCB";

/// Version of parameter entries.
pub const PARAMETER_DATA_VERSION: &str = "8D5EAAD9-8514-4957-B931-C7AF2698794F";

/// `{plugin}_{version}_{id}`.
pub fn cache_key(plugin: &str, version: &str, id: &DataId) -> String {
    format!("{plugin}_{version}_{}", id.to_hex())
}

/// Key of a derived texture entry.
pub fn texture_key(id: &DataId) -> String {
    cache_key(DERIVED_DATA_PLUGIN, TEXTURE_DATA_VERSION, id)
}

/// Key of a parameter entry.
pub fn parameter_key(id: &DataId) -> String {
    cache_key(DERIVED_DATA_PLUGIN, PARAMETER_DATA_VERSION, id)
}

/// Byte store shared by every build.
pub trait BuildCache: Send + Sync {
    /// Stored bytes for `key`, if any.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `data` under `key`. Failures are logged, not returned.
    fn put(&self, key: &str, data: &[u8]);
}

/// Counters of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: usize,
    /// Lookups that found nothing.
    pub misses: usize,
    /// Entries written.
    pub puts: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    puts: AtomicUsize,
}

impl Counters {
    fn lookup(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
        }
    }
}

/// Cache that never hits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl BuildCache for NullCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn put(&self, _key: &str, _data: &[u8]) {}
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    counters: Counters,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Lookup and write counters.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

impl BuildCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let found = self.entries.read().get(key).cloned();
        self.counters.lookup(found.is_some());
        found
    }

    fn put(&self, key: &str, data: &[u8]) {
        self.entries.write().insert(key.to_string(), data.to_vec());
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
    }
}

/// One file per entry under a directory.
///
/// Writes go to a temporary file in the same directory that is then renamed
/// over the entry, so readers never see a partial file.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    counters: Counters,
}

impl FileCache {
    /// Opens `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, BuildError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| BuildError::create_dir(&dir, e))?;
        Ok(Self {
            dir,
            counters: Counters::default(),
        })
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lookup and write counters.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.bin"))
    }

    fn write_entry(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(data)?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl BuildCache for FileCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(key);
        match std::fs::read(&path) {
            Ok(data) => {
                self.counters.lookup(true);
                Some(data)
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("build cache: failed to read '{}': {e}", path.display());
                }
                self.counters.lookup(false);
                None
            }
        }
    }

    fn put(&self, key: &str, data: &[u8]) {
        let path = self.entry_path(key);
        match self.write_entry(&path, data) {
            Ok(()) => {
                self.counters.puts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!("build cache: failed to write '{}': {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use texset_core::HashBuilder;

    fn some_id() -> DataId {
        let mut builder = HashBuilder::new();
        builder.write_str("texture");
        builder.finish()
    }

    // --- keys ---

    #[test]
    fn key_format() {
        let id = some_id();
        let key = texture_key(&id);
        assert!(key.starts_with("TextureSet_FDerivedTextureData_F956B1B9-3AD3-47B3-BD82-8826C71A3DCB_"));
        assert!(key.ends_with(&id.to_hex()));
        assert_ne!(texture_key(&id), parameter_key(&id));
    }

    // --- memory ---

    #[test]
    fn memory_cache_counts() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("a"), None);
        cache.put("a", b"xyz");
        assert_eq!(cache.get("a").as_deref(), Some(&b"xyz"[..]));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                puts: 1
            }
        );
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn null_cache_never_hits() {
        let cache = NullCache;
        cache.put("a", b"1");
        assert_eq!(cache.get("a"), None);
    }

    // --- file ---

    #[test]
    fn file_cache_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let key = parameter_key(&some_id());
        {
            let cache = FileCache::open(dir.path().join("cache")).unwrap();
            assert_eq!(cache.get(&key), None);
            cache.put(&key, b"payload");
            assert_eq!(cache.stats().puts, 1);
        }
        let cache = FileCache::open(dir.path().join("cache")).unwrap();
        assert_eq!(cache.get(&key).as_deref(), Some(&b"payload"[..]));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn file_cache_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        cache.put("k", b"one");
        cache.put("k", b"two");
        assert_eq!(cache.get("k").as_deref(), Some(&b"two"[..]));
    }

    #[test]
    fn keys_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let path = cache.entry_path("../escape/key");
        assert_eq!(path.parent(), Some(dir.path()));
        assert!(!path.to_string_lossy().contains(".."));
    }
}
