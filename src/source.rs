//! Data-source contract
//!
//! A data source is the terminal producer at the bottom of a loader chain:
//! when every tier misses, the loader asks the source to materialise the
//! value and backfills its own store with the result. Sources that can
//! answer versioned reads opt in through [`DataSource::supports_versioning`];
//! asking an ordinary source for a versioned load is a coding error.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{CacheError, Result};
use crate::value::{CacheKey, CacheValue};

/// Terminal producer of values for a cache
pub trait DataSource: Send + Sync {
    /// Materialise the value for `key`, or report that none exists.
    fn load_for_cache(&self, key: &CacheKey) -> Result<Option<CacheValue>>;

    /// Materialise many values, position-matched to `keys`.
    fn load_many_for_cache(&self, keys: &[CacheKey]) -> Result<Vec<Option<CacheValue>>> {
        keys.iter().map(|key| self.load_for_cache(key)).collect()
    }

    /// Whether this source can answer versioned loads.
    fn supports_versioning(&self) -> bool {
        false
    }

    /// Materialise the value for `key` together with its actual version.
    ///
    /// The actual version must be at least `required_version`; the loader
    /// treats anything older as a coding error on the source's side.
    fn load_for_cache_versioned(
        &self,
        key: &CacheKey,
        required_version: u64,
    ) -> Result<Option<(CacheValue, u64)>> {
        let _ = (key, required_version);
        Err(CacheError::Contract(
            "data source does not support versioned loads".to_string(),
        ))
    }
}

/// Table-backed data source
///
/// Serves values from an in-process table, optionally version-tagged.
/// Useful as the terminal producer in tests and small deployments; tracks
/// how many loads it has served.
pub struct StaticSource {
    entries: DashMap<CacheKey, CacheValue>,
    version: RwLock<Option<u64>>,
    loads: AtomicU64,
}

impl StaticSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            version: RwLock::new(None),
            loads: AtomicU64::new(0),
        }
    }

    /// Insert or replace an entry.
    pub fn insert(&self, key: impl Into<CacheKey>, value: impl Into<CacheValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Tag every served value with `version` and enable versioned loads.
    pub fn set_version(&self, version: u64) {
        *self.version.write() = Some(version);
    }

    /// How many load calls this source has served.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

impl Default for StaticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSource for StaticSource {
    fn load_for_cache(&self, key: &CacheKey) -> Result<Option<CacheValue>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn supports_versioning(&self) -> bool {
        self.version.read().is_some()
    }

    fn load_for_cache_versioned(
        &self,
        key: &CacheKey,
        _required_version: u64,
    ) -> Result<Option<(CacheValue, u64)>> {
        let version = match *self.version.read() {
            Some(version) => version,
            None => {
                return Err(CacheError::Contract(
                    "data source does not support versioned loads".to_string(),
                ))
            }
        };
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .entries
            .get(key)
            .map(|entry| (entry.value().clone(), version)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_source_load() {
        let source = StaticSource::new();
        source.insert("a", 1i64);

        assert_eq!(
            source.load_for_cache(&CacheKey::from("a")).unwrap(),
            Some(CacheValue::Int(1))
        );
        assert_eq!(source.load_for_cache(&CacheKey::from("b")).unwrap(), None);
        assert_eq!(source.load_count(), 2);
    }

    #[test]
    fn test_batched_default() {
        let source = StaticSource::new();
        source.insert("a", 1i64);
        source.insert("c", 3i64);

        let keys = [
            CacheKey::from("a"),
            CacheKey::from("b"),
            CacheKey::from("c"),
        ];
        let values = source.load_many_for_cache(&keys).unwrap();
        assert_eq!(
            values,
            vec![Some(CacheValue::Int(1)), None, Some(CacheValue::Int(3))]
        );
    }

    #[test]
    fn test_versioned_load_requires_opt_in() {
        let source = StaticSource::new();
        source.insert("k", "v");

        assert!(!source.supports_versioning());
        assert!(source
            .load_for_cache_versioned(&CacheKey::from("k"), 1)
            .is_err());

        source.set_version(5);
        assert!(source.supports_versioning());
        assert_eq!(
            source
                .load_for_cache_versioned(&CacheKey::from("k"), 1)
                .unwrap(),
            Some((CacheValue::Str("v".to_string()), 5))
        );
    }
}
