//! Build context handed to nodes while hashing and preparing.
//!
//! Everything a node reads from the outside world goes through
//! [`ProcessingContext`]: named sources and asset-level configuration. Nodes
//! copy what they need into their own state during prepare, so the context is
//! never touched from worker threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::source::{SourceProvider, SourceTextures};

/// A typed, named asset-level configuration object.
///
/// Lookups fall back to [`Default`] when the object is absent or malformed.
pub trait AssetParam: Default + Serialize + DeserializeOwned {
    /// Storage key.
    const KEY: &'static str;
}

/// Asset-level configuration objects keyed by [`AssetParam::KEY`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AssetParams {
    values: BTreeMap<String, serde_json::Value>,
}

impl AssetParams {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value of `T`, or `T::default()`.
    pub fn get<T: AssetParam>(&self) -> T {
        match self.values.get(T::KEY) {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|err| {
                tracing::warn!("asset param '{}' is malformed, using default: {err}", T::KEY);
                T::default()
            }),
            None => T::default(),
        }
    }

    /// Stores `value` under `T::KEY`.
    pub fn set<T: AssetParam>(&mut self, value: &T) -> &mut Self {
        match serde_json::to_value(value) {
            Ok(json) => {
                self.values.insert(T::KEY.to_string(), json);
            }
            Err(err) => tracing::warn!("asset param '{}' failed to serialize: {err}", T::KEY),
        }
        self
    }

    /// Builder form of [`set`](Self::set).
    pub fn with<T: AssetParam>(mut self, value: &T) -> Self {
        self.set(value);
        self
    }

    /// Stores a raw value under `key`.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Sources and asset configuration for one build.
#[derive(Clone)]
pub struct ProcessingContext {
    /// Named source resolution.
    pub sources: Arc<dyn SourceProvider>,
    /// Asset-level configuration.
    pub asset_params: AssetParams,
}

impl ProcessingContext {
    /// Creates a context.
    pub fn new(sources: Arc<dyn SourceProvider>, asset_params: AssetParams) -> Self {
        Self {
            sources,
            asset_params,
        }
    }

    /// Context with no sources and default configuration.
    pub fn empty() -> Self {
        Self::new(Arc::new(SourceTextures::new()), AssetParams::new())
    }
}

impl core::fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("asset_params", &self.asset_params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct TestParams {
        scale: f32,
        enabled: bool,
    }

    impl AssetParam for TestParams {
        const KEY: &'static str = "test";
    }

    #[test]
    fn missing_param_uses_default() {
        let params = AssetParams::new();
        assert_eq!(params.get::<TestParams>(), TestParams::default());
    }

    #[test]
    fn stored_param_round_trips() {
        let stored = TestParams {
            scale: 2.5,
            enabled: true,
        };
        let params = AssetParams::new().with(&stored);
        assert_eq!(params.get::<TestParams>(), stored);
    }

    #[test]
    fn malformed_param_uses_default() {
        let mut params = AssetParams::new();
        params.insert_raw("test", serde_json::json!("not an object"));
        assert_eq!(params.get::<TestParams>(), TestParams::default());
    }

    #[test]
    fn partial_param_fills_defaults() {
        let mut params = AssetParams::new();
        params.insert_raw("test", serde_json::json!({ "enabled": true }));
        let got = params.get::<TestParams>();
        assert!(got.enabled);
        assert_eq!(got.scale, 0.0);
    }
}
