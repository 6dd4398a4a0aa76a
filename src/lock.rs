//! Write-lock acquisition
//!
//! When a cache requires locking before writes, the loader takes a per-key
//! advisory lock around every store write. Stores that expose native
//! locking are used directly; for every other store a process-wide registry
//! stands in as the secondary lock store. Acquisition retries with a short
//! backoff up to a bounded wait, and the returned guard releases on every
//! exit path, including faults.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::{CacheError, Result};
use crate::key::ParsedKey;
use crate::store::{LockState, Store};

/// How long a write waits for a contended lock before failing.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Process-wide fallback lock table for stores without native locking
pub struct LockRegistry {
    locks: DashMap<(String, ParsedKey), String>,
}

static REGISTRY: Lazy<LockRegistry> = Lazy::new(|| LockRegistry {
    locks: DashMap::new(),
});

impl LockRegistry {
    /// The shared process-wide registry.
    pub fn global() -> &'static LockRegistry {
        &REGISTRY
    }

    /// Try to take the lock; `false` when another owner holds it.
    pub fn try_acquire(&self, scope: &str, key: &ParsedKey, owner: &str) -> bool {
        let slot = (scope.to_string(), key.clone());
        match self.locks.entry(slot) {
            dashmap::mapref::entry::Entry::Occupied(held) => held.get().as_str() == owner,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(owner.to_string());
                true
            }
        }
    }

    /// Release the lock; `false` when `owner` did not hold it.
    pub fn release(&self, scope: &str, key: &ParsedKey, owner: &str) -> bool {
        self.locks
            .remove_if(&(scope.to_string(), key.clone()), |_, holder| {
                holder.as_str() == owner
            })
            .is_some()
    }

    /// The lock state for `key` from `owner`'s point of view.
    pub fn state(&self, scope: &str, key: &ParsedKey, owner: &str) -> LockState {
        match self.locks.get(&(scope.to_string(), key.clone())) {
            Some(holder) if holder.value().as_str() == owner => LockState::Held,
            Some(_) => LockState::HeldByOther,
            None => LockState::NotHeld,
        }
    }
}

/// The lock state for `key`, consulting the store's native lock when it has
/// one and the fallback registry otherwise.
pub fn lock_state(store: &dyn Store, scope: &str, key: &ParsedKey, owner: &str) -> Result<LockState> {
    if store.capabilities().lockable {
        store.check_lock_state(key, owner)
    } else {
        Ok(LockRegistry::global().state(scope, key, owner))
    }
}

/// A held write lock; released on drop
pub struct LockGuard<'a> {
    store: Option<&'a dyn Store>,
    scope: String,
    key: ParsedKey,
    owner: String,
    active: bool,
}

impl LockGuard<'_> {
    /// Release the lock now, reporting whether the owner held it.
    pub fn release(mut self) -> Result<bool> {
        self.active = false;
        match self.store {
            Some(store) => store.release_lock(&self.key, &self.owner),
            None => Ok(LockRegistry::global().release(&self.scope, &self.key, &self.owner)),
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        // Faulted exit path: release best-effort.
        match self.store {
            Some(store) => {
                let _ = store.release_lock(&self.key, &self.owner);
            }
            None => {
                LockRegistry::global().release(&self.scope, &self.key, &self.owner);
            }
        }
    }
}

/// Acquire the write lock for `key`, waiting up to `timeout`.
pub fn acquire<'a>(
    store: &'a dyn Store,
    scope: &str,
    key: &ParsedKey,
    owner: &str,
    timeout: Duration,
) -> Result<LockGuard<'a>> {
    let native = store.capabilities().lockable;
    let start = Instant::now();

    loop {
        let acquired = if native {
            store.acquire_lock(key, owner)?
        } else {
            LockRegistry::global().try_acquire(scope, key, owner)
        };

        if acquired {
            return Ok(LockGuard {
                store: if native { Some(store) } else { None },
                scope: scope.to_string(),
                key: key.clone(),
                owner: owner.to_string(),
                active: true,
            });
        }

        if start.elapsed() >= timeout {
            return Err(CacheError::Lock(format!(
                "timed out waiting for write lock on {}",
                key
            )));
        }

        std::thread::sleep(RETRY_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MemoryStoreConfig, StoreCapabilities};

    fn key(name: &str) -> ParsedKey {
        ParsedKey::Hash(name.to_string())
    }

    fn lockable_store() -> MemoryStore {
        MemoryStore::with_config(MemoryStoreConfig {
            capabilities: StoreCapabilities {
                lockable: true,
                key_aware: true,
                ..StoreCapabilities::default()
            },
            ttl: None,
        })
    }

    #[test]
    fn test_registry_acquire_release() {
        let registry = LockRegistry::global();
        let k = key("registry-basic");

        assert!(registry.try_acquire("scope", &k, "owner-a"));
        assert!(registry.try_acquire("scope", &k, "owner-a"));
        assert!(!registry.try_acquire("scope", &k, "owner-b"));
        assert_eq!(registry.state("scope", &k, "owner-b"), LockState::HeldByOther);

        assert!(registry.release("scope", &k, "owner-a"));
        assert_eq!(registry.state("scope", &k, "owner-a"), LockState::NotHeld);
    }

    #[test]
    fn test_registry_scopes_are_independent() {
        let registry = LockRegistry::global();
        let k = key("registry-scoped");

        assert!(registry.try_acquire("cache-a", &k, "owner-a"));
        assert!(registry.try_acquire("cache-b", &k, "owner-b"));

        registry.release("cache-a", &k, "owner-a");
        registry.release("cache-b", &k, "owner-b");
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let store = lockable_store();
        let k = key("guard-drop");

        {
            let _guard = acquire(&store, "scope", &k, "owner-a", LOCK_TIMEOUT).unwrap();
            assert_eq!(
                store.check_lock_state(&k, "owner-a").unwrap(),
                LockState::Held
            );
        }

        assert_eq!(
            store.check_lock_state(&k, "owner-a").unwrap(),
            LockState::NotHeld
        );
    }

    #[test]
    fn test_contended_acquire_times_out() {
        let store = lockable_store();
        let k = key("contended");

        let guard = acquire(&store, "scope", &k, "owner-a", LOCK_TIMEOUT).unwrap();
        let result = acquire(&store, "scope", &k, "owner-b", Duration::from_millis(50));
        assert!(matches!(result, Err(CacheError::Lock(_))));

        guard.release().unwrap();
        let guard = acquire(&store, "scope", &k, "owner-b", LOCK_TIMEOUT).unwrap();
        guard.release().unwrap();
    }

    #[test]
    fn test_fallback_registry_used_for_plain_store() {
        let store = MemoryStore::new();
        let k = key("fallback");

        let guard = acquire(&store, "scope", &k, "owner-a", LOCK_TIMEOUT).unwrap();
        assert_eq!(
            lock_state(&store, "scope", &k, "owner-a").unwrap(),
            LockState::Held
        );
        assert_eq!(
            lock_state(&store, "scope", &k, "owner-b").unwrap(),
            LockState::HeldByOther
        );

        guard.release().unwrap();
        assert_eq!(
            lock_state(&store, "scope", &k, "owner-a").unwrap(),
            LockState::NotHeld
        );
    }
}
