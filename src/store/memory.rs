//! In-process reference store
//!
//! A `DashMap`-backed store used as the default backing engine and by the
//! test suite. Every capability flag is configurable so loader behavior can
//! be exercised against any capability combination; the native-TTL mode
//! keeps its own expiry bookkeeping and filters dead entries on retrieval.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::clock;
use crate::envelope::StoredValue;
use crate::error::{CacheError, Result};
use crate::key::ParsedKey;
use crate::store::{LockState, Store, StoreCapabilities};

/// Memory store configuration
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Capability flags the store advertises
    pub capabilities: StoreCapabilities,
    /// Native TTL in seconds; only used when `capabilities.native_ttl`
    pub ttl: Option<u64>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            capabilities: StoreCapabilities {
                native_ttl: false,
                multiple_identifiers: false,
                dereferences_objects: false,
                key_aware: true,
                lockable: false,
            },
            ttl: None,
        }
    }
}

/// In-process key-value store over a concurrent map
pub struct MemoryStore {
    table: DashMap<ParsedKey, StoredValue>,
    expiries: DashMap<ParsedKey, u64>,
    locks: DashMap<ParsedKey, String>,
    config: MemoryStoreConfig,
    last_io_bytes: AtomicU64,
}

impl MemoryStore {
    /// Create a store with the default capability set.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Create a store with a custom capability set.
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            table: DashMap::new(),
            expiries: DashMap::new(),
            locks: DashMap::new(),
            config,
            last_io_bytes: AtomicU64::new(0),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn record_io(&self, value: &StoredValue) {
        if let Ok(bytes) = bincode::serialized_size(value) {
            self.last_io_bytes.store(bytes, Ordering::Relaxed);
        }
    }

    fn natively_expired(&self, key: &ParsedKey) -> bool {
        match self.expiries.get(key) {
            Some(expires_at) => clock::now_secs() >= *expires_at,
            None => false,
        }
    }

    fn require_lockable(&self) -> Result<()> {
        if self.config.capabilities.lockable {
            Ok(())
        } else {
            Err(CacheError::Lock(
                "memory store built without locking support".to_string(),
            ))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.config.capabilities
    }

    fn get(&self, key: &ParsedKey) -> Result<Option<StoredValue>> {
        if self.config.capabilities.native_ttl && self.natively_expired(key) {
            self.table.remove(key);
            self.expiries.remove(key);
            return Ok(None);
        }

        match self.table.get(key) {
            Some(entry) => {
                let value = entry.value().clone();
                self.record_io(&value);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &ParsedKey, value: StoredValue) -> Result<bool> {
        self.record_io(&value);
        if self.config.capabilities.native_ttl {
            if let Some(ttl) = self.config.ttl {
                self.expiries.insert(key.clone(), clock::now_secs() + ttl);
            }
        }
        self.table.insert(key.clone(), value);
        Ok(true)
    }

    fn delete(&self, key: &ParsedKey) -> Result<bool> {
        self.expiries.remove(key);
        Ok(self.table.remove(key).is_some())
    }

    fn has(&self, key: &ParsedKey) -> Result<bool> {
        if self.config.capabilities.native_ttl && self.natively_expired(key) {
            self.table.remove(key);
            self.expiries.remove(key);
            return Ok(false);
        }
        Ok(self.table.contains_key(key))
    }

    fn purge(&self) -> Result<()> {
        self.table.clear();
        self.expiries.clear();
        Ok(())
    }

    fn acquire_lock(&self, key: &ParsedKey, owner: &str) -> Result<bool> {
        self.require_lockable()?;
        match self.locks.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(held) => Ok(held.get().as_str() == owner),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(owner.to_string());
                Ok(true)
            }
        }
    }

    fn release_lock(&self, key: &ParsedKey, owner: &str) -> Result<bool> {
        self.require_lockable()?;
        let released = self
            .locks
            .remove_if(key, |_, holder| holder.as_str() == owner)
            .is_some();
        Ok(released)
    }

    fn check_lock_state(&self, key: &ParsedKey, owner: &str) -> Result<LockState> {
        self.require_lockable()?;
        match self.locks.get(key) {
            Some(holder) if holder.value().as_str() == owner => Ok(LockState::Held),
            Some(_) => Ok(LockState::HeldByOther),
            None => Ok(LockState::NotHeld),
        }
    }

    fn last_io_bytes(&self) -> Option<u64> {
        Some(self.last_io_bytes.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CacheValue;

    fn key(name: &str) -> ParsedKey {
        ParsedKey::Hash(name.to_string())
    }

    fn raw(value: i64) -> StoredValue {
        StoredValue::Raw(CacheValue::Int(value))
    }

    #[test]
    fn test_basic_round_trip() {
        let store = MemoryStore::new();

        assert!(store.set(&key("a"), raw(1)).unwrap());
        assert_eq!(store.get(&key("a")).unwrap(), Some(raw(1)));
        assert!(store.has(&key("a")).unwrap());

        assert!(store.delete(&key("a")).unwrap());
        assert_eq!(store.get(&key("a")).unwrap(), None);
        assert!(!store.delete(&key("a")).unwrap());
    }

    #[test]
    fn test_batched_defaults() {
        let store = MemoryStore::new();
        store.set(&key("a"), raw(1)).unwrap();
        store.set(&key("b"), raw(2)).unwrap();

        let values = store.get_many(&[key("a"), key("missing"), key("b")]).unwrap();
        assert_eq!(values, vec![Some(raw(1)), None, Some(raw(2))]);

        assert!(store.has_any(&[key("missing"), key("a")]).unwrap());
        assert!(!store.has_all(&[key("missing"), key("a")]).unwrap());

        assert_eq!(store.delete_many(&[key("a"), key("b"), key("c")]).unwrap(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge() {
        let store = MemoryStore::new();
        store.set(&key("a"), raw(1)).unwrap();
        store.set(&key("b"), raw(2)).unwrap();

        store.purge().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_native_ttl_expiry() {
        let _clock = crate::clock::TEST_CLOCK_GUARD.lock();
        let config = MemoryStoreConfig {
            capabilities: StoreCapabilities {
                native_ttl: true,
                key_aware: true,
                ..StoreCapabilities::default()
            },
            ttl: Some(10),
        };
        let store = MemoryStore::with_config(config);

        clock::set_instant(1000.0);
        store.set(&key("x"), raw(1)).unwrap();
        assert!(store.has(&key("x")).unwrap());

        clock::set_instant(1009.0);
        assert_eq!(store.get(&key("x")).unwrap(), Some(raw(1)));

        clock::set_instant(1010.0);
        assert_eq!(store.get(&key("x")).unwrap(), None);
        assert!(!store.has(&key("x")).unwrap());
        clock::reset();
    }

    #[test]
    fn test_locking() {
        let config = MemoryStoreConfig {
            capabilities: StoreCapabilities {
                lockable: true,
                key_aware: true,
                ..StoreCapabilities::default()
            },
            ttl: None,
        };
        let store = MemoryStore::with_config(config);

        assert!(store.acquire_lock(&key("k"), "owner-a").unwrap());
        assert_eq!(
            store.check_lock_state(&key("k"), "owner-a").unwrap(),
            LockState::Held
        );
        assert_eq!(
            store.check_lock_state(&key("k"), "owner-b").unwrap(),
            LockState::HeldByOther
        );

        // Second owner cannot take or release the held lock.
        assert!(!store.acquire_lock(&key("k"), "owner-b").unwrap());
        assert!(!store.release_lock(&key("k"), "owner-b").unwrap());

        assert!(store.release_lock(&key("k"), "owner-a").unwrap());
        assert_eq!(
            store.check_lock_state(&key("k"), "owner-a").unwrap(),
            LockState::NotHeld
        );
    }

    #[test]
    fn test_lock_unsupported_by_default() {
        let store = MemoryStore::new();
        assert!(store.acquire_lock(&key("k"), "owner").is_err());
    }

    #[test]
    fn test_io_bytes_tracked() {
        let store = MemoryStore::new();
        assert_eq!(store.last_io_bytes(), Some(0));

        store.set(&key("a"), raw(1)).unwrap();
        assert!(store.last_io_bytes().unwrap() > 0);
    }
}
