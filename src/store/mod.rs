//! Store contract
//!
//! A store is the backing key-value engine a loader delegates raw storage
//! to. Stores differ in what they can do natively (TTL, structured keys,
//! locking, dereferencing on retrieval); the loader probes the capability
//! set once at construction and adapts its envelope composition and locking
//! discipline to it, so the contract here is the union of everything any
//! store might offer, with unsupported operations failing by default.

use crate::envelope::StoredValue;
use crate::error::{CacheError, Result};
use crate::key::ParsedKey;

pub mod memory;

pub use memory::{MemoryStore, MemoryStoreConfig};

/// Static capability flags, probed once per loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCapabilities {
    /// Store expires entries itself; the loader skips TTL wrapping
    pub native_ttl: bool,
    /// Store wants structured `{component, area, identifiers, key}` keys
    pub multiple_identifiers: bool,
    /// Retrieval already hands back detached values; the loader skips
    /// reference breaking
    pub dereferences_objects: bool,
    /// Store answers `has` without fetching the value
    pub key_aware: bool,
    /// Store provides native per-key advisory locks
    pub lockable: bool,
}

/// Advisory lock state for a key, as seen by one owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// The asking owner holds the lock
    Held,
    /// Some other owner holds the lock
    HeldByOther,
    /// Nobody holds the lock
    NotHeld,
}

/// Backing key-value engine
///
/// All operations may block on I/O. Read faults are the loader's to swallow;
/// implementations report them as `Err` and never panic. Batched operations
/// have loop defaults so simple stores only implement the single-key core.
pub trait Store: Send + Sync {
    /// The store's capability set. Must be constant over the store's life.
    fn capabilities(&self) -> StoreCapabilities;

    /// Fetch a value.
    fn get(&self, key: &ParsedKey) -> Result<Option<StoredValue>>;

    /// Fetch many values, position-matched to `keys`.
    fn get_many(&self, keys: &[ParsedKey]) -> Result<Vec<Option<StoredValue>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Write a value. `Ok(false)` means the store declined the write.
    fn set(&self, key: &ParsedKey, value: StoredValue) -> Result<bool>;

    /// Write many values, returning how many were stored.
    fn set_many(&self, entries: Vec<(ParsedKey, StoredValue)>) -> Result<usize> {
        let mut stored = 0;
        for (key, value) in entries {
            if self.set(&key, value)? {
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Delete a key, reporting whether it existed.
    fn delete(&self, key: &ParsedKey) -> Result<bool>;

    /// Delete many keys, returning how many existed.
    fn delete_many(&self, keys: &[ParsedKey]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Whether a key is present.
    fn has(&self, key: &ParsedKey) -> Result<bool>;

    /// Whether every key is present.
    fn has_all(&self, keys: &[ParsedKey]) -> Result<bool> {
        for key in keys {
            if !self.has(key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether at least one key is present.
    fn has_any(&self, keys: &[ParsedKey]) -> Result<bool> {
        for key in keys {
            if self.has(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drop every entry.
    fn purge(&self) -> Result<()>;

    /// Try to take the advisory lock for `key` on behalf of `owner`.
    ///
    /// Non-blocking: `Ok(false)` means another owner holds it. Only
    /// meaningful when [`StoreCapabilities::lockable`] is set.
    fn acquire_lock(&self, key: &ParsedKey, owner: &str) -> Result<bool> {
        let _ = (key, owner);
        Err(CacheError::Lock("store does not support locking".to_string()))
    }

    /// Release the advisory lock, reporting whether `owner` held it.
    fn release_lock(&self, key: &ParsedKey, owner: &str) -> Result<bool> {
        let _ = (key, owner);
        Err(CacheError::Lock("store does not support locking".to_string()))
    }

    /// Inspect the advisory lock for `key` from `owner`'s point of view.
    fn check_lock_state(&self, key: &ParsedKey, owner: &str) -> Result<LockState> {
        let _ = (key, owner);
        Err(CacheError::Lock("store does not support locking".to_string()))
    }

    /// Bytes moved by the most recent operation, when the store tracks it.
    fn last_io_bytes(&self) -> Option<u64> {
        None
    }
}
