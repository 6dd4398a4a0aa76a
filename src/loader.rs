//! Cache loaders
//!
//! A loader is one link in the cache chain: it owns one store, an optional
//! static-acceleration tier, and either a next loader or a data source
//! (never both). Reads walk down the chain until a tier hits or the data
//! source materialises a value, backfilling only the local store on the way
//! out; writes propagate to the end of the chain first so ancestors always
//! hold at least as fresh a value. Deletes and purges walk the chain too.
//!
//! The loader owns the envelope discipline (TTL wrapping when the store has
//! no native TTL, version tagging, cached-object markers), the write-lock
//! policy, event-invalidation processing, and reference safety for values
//! handed back to callers.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};
use uuid::Uuid;

use crate::acceleration::StaticAcceleration;
use crate::clock;
use crate::definition::Definition;
use crate::envelope::StoredValue;
use crate::error::{CacheError, Result};
use crate::invalidation::{self, EventChannel};
use crate::key::{self, ParsedKey};
use crate::lock;
use crate::refsafe;
use crate::source::DataSource;
use crate::store::{LockState, Store, StoreCapabilities};
use crate::value::{CacheKey, CacheValue};

/// What a read does when the key is missing everywhere
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Return the missing sentinel (`None`)
    IgnoreMissing,
    /// Fail with a coding error
    MustExist,
}

/// One link in the cache chain
pub struct CacheLoader {
    definition: Definition,
    store: Arc<dyn Store>,
    capabilities: StoreCapabilities,
    next: Option<Box<CacheLoader>>,
    source: Option<Arc<dyn DataSource>>,
    acceleration: Option<StaticAcceleration>,
    event_channel: Option<EventChannel>,
    lock_owner: String,
    is_sub_loader: bool,
    invalidation_processed: bool,
}

/// Builder wiring a loader to its store, chain and collaborators
pub struct CacheLoaderBuilder {
    definition: Definition,
    store: Arc<dyn Store>,
    next: Option<CacheLoader>,
    source: Option<Arc<dyn DataSource>>,
    event_channel: Option<EventChannel>,
}

impl CacheLoaderBuilder {
    /// Attach the next loader in the chain. Mutually exclusive with a data
    /// source.
    pub fn next_loader(mut self, next: CacheLoader) -> Self {
        self.next = Some(next);
        self
    }

    /// Attach the terminal data source. Mutually exclusive with a next
    /// loader.
    pub fn data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach the event-invalidation channel this loader consults.
    pub fn event_channel(mut self, channel: EventChannel) -> Self {
        self.event_channel = Some(channel);
        self
    }

    /// Build the loader, enforcing the next-loader/data-source exclusivity.
    pub fn build(self) -> Result<CacheLoader> {
        if self.next.is_some() && self.source.is_some() {
            return Err(CacheError::Contract(
                "a loader takes a next loader or a data source, never both".to_string(),
            ));
        }
        let mut next = self.next.map(Box::new);
        if let Some(next) = next.as_mut() {
            next.mark_sub_loader();
        }
        Ok(CacheLoader::assemble(
            self.definition,
            self.store,
            next,
            self.source,
            self.event_channel,
        ))
    }
}

impl CacheLoader {
    /// Create a standalone loader over `store`.
    pub fn new(definition: Definition, store: Arc<dyn Store>) -> Self {
        Self::assemble(definition, store, None, None, None)
    }

    /// Start building a loader with chain and collaborator wiring.
    pub fn builder(definition: Definition, store: Arc<dyn Store>) -> CacheLoaderBuilder {
        CacheLoaderBuilder {
            definition,
            store,
            next: None,
            source: None,
            event_channel: None,
        }
    }

    fn assemble(
        definition: Definition,
        store: Arc<dyn Store>,
        next: Option<Box<CacheLoader>>,
        source: Option<Arc<dyn DataSource>>,
        event_channel: Option<EventChannel>,
    ) -> Self {
        let capabilities = store.capabilities();
        let acceleration = if definition.static_acceleration {
            Some(StaticAcceleration::new(
                definition.static_acceleration_size,
                definition.simple_data,
            ))
        } else {
            None
        };
        Self {
            definition,
            store,
            capabilities,
            next,
            source,
            acceleration,
            event_channel,
            lock_owner: Uuid::new_v4().to_string(),
            is_sub_loader: false,
            invalidation_processed: false,
        }
    }

    /// Sub-loaders never accelerate and never process events themselves;
    /// the top of the chain drives both.
    fn mark_sub_loader(&mut self) {
        self.is_sub_loader = true;
        self.acceleration = None;
        self.invalidation_processed = true;
    }

    /// The loader's definition.
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Whether the static-acceleration tier is running.
    pub fn uses_static_acceleration(&self) -> bool {
        self.acceleration.is_some()
    }

    /// Whether this loader sits below another loader in a chain.
    pub fn is_sub_loader(&self) -> bool {
        self.is_sub_loader
    }

    /// Fetch a value.
    pub fn get(
        &mut self,
        key: impl Into<CacheKey>,
        strictness: Strictness,
    ) -> Result<Option<CacheValue>> {
        let key = key.into();
        self.ensure_invalidation_processed()?;
        let value = self.fetch(&key, None)?.map(|(value, _)| value);
        self.finish(&key, value, strictness)
    }

    /// Fetch a value that must carry at least `required_version`.
    ///
    /// Anything older is treated as a miss and eagerly deleted so concurrent
    /// readers stop refetching a stale payload.
    pub fn get_versioned(
        &mut self,
        key: impl Into<CacheKey>,
        required_version: u64,
        strictness: Strictness,
    ) -> Result<Option<CacheValue>> {
        let key = key.into();
        self.ensure_invalidation_processed()?;
        let value = self
            .fetch(&key, Some(required_version))?
            .map(|(value, _)| value);
        self.finish(&key, value, strictness)
    }

    /// Fetch many values in one pass, preserving caller-key identity.
    pub fn get_many(
        &mut self,
        keys: &[CacheKey],
        strictness: Strictness,
    ) -> Result<BTreeMap<CacheKey, Option<CacheValue>>> {
        self.ensure_invalidation_processed()?;
        let mut results: BTreeMap<CacheKey, Option<CacheValue>> = BTreeMap::new();
        let mut remaining: Vec<CacheKey> = Vec::new();

        for key in keys {
            let entry = match self.acceleration.as_mut() {
                Some(accel) => accel.get(key)?,
                None => None,
            };
            match entry {
                Some(entry) => {
                    let value = self.materialise(entry.unwrap_version().into_value())?;
                    results.insert(key.clone(), Some(value));
                }
                None => remaining.push(key.clone()),
            }
        }

        let mut misses: Vec<CacheKey> = Vec::new();
        if !remaining.is_empty() {
            let parsed: Vec<ParsedKey> = remaining.iter().map(|k| self.parse_key(k)).collect();
            let fetched = {
                let result = self.store.get_many(&parsed);
                self.read_or_miss(result, vec![None; parsed.len()])?
            };

            for ((key, parsed_key), stored) in
                remaining.iter().zip(parsed.iter()).zip(fetched.into_iter())
            {
                let validated = match stored {
                    Some(stored) => self.validate(stored, parsed_key, None)?,
                    None => None,
                };
                match validated {
                    Some((payload, version)) => {
                        if let Some(accel) = self.acceleration.as_mut() {
                            accel.set(
                                key.clone(),
                                StoredValue::compose(payload.clone(), None, version),
                            )?;
                        }
                        let value = self.materialise(payload)?;
                        let value =
                            refsafe::detach(value, &self.capabilities, &self.definition)?;
                        results.insert(key.clone(), Some(value));
                    }
                    None => misses.push(key.clone()),
                }
            }
        }

        if !misses.is_empty() {
            let resolved: Vec<Option<CacheValue>> = if let Some(next) = self.next.as_mut() {
                let downstream = next.get_many(&misses, Strictness::IgnoreMissing)?;
                misses
                    .iter()
                    .map(|key| downstream.get(key).cloned().flatten())
                    .collect()
            } else if let Some(source) = self.source.clone() {
                source.load_many_for_cache(&misses)?
            } else {
                vec![None; misses.len()]
            };

            for (key, value) in misses.into_iter().zip(resolved.into_iter()) {
                match value {
                    Some(value) => {
                        self.backfill(&key, value.clone(), None)?;
                        let value = self.materialise(value)?;
                        results.insert(key, Some(value));
                    }
                    None => {
                        results.insert(key, None);
                    }
                }
            }
        }

        if strictness == Strictness::MustExist {
            if let Some((key, _)) = results.iter().find(|(_, value)| value.is_none()) {
                return Err(CacheError::Contract(format!(
                    "required key {} missing from cache {}",
                    key,
                    self.definition.id()
                )));
            }
        }
        Ok(results)
    }

    /// Write a value, propagating through the chain first.
    ///
    /// `Ok(false)` means the local store declined or faulted on the write.
    pub fn set(&mut self, key: impl Into<CacheKey>, data: impl Into<CacheValue>) -> Result<bool> {
        self.store_value(key.into(), data.into(), None)
    }

    /// Write a version-tagged value.
    ///
    /// Must never be mixed with unversioned writes to the same cache; the
    /// read path surfaces the mismatch as a coding error.
    pub fn set_versioned(
        &mut self,
        key: impl Into<CacheKey>,
        version: u64,
        data: impl Into<CacheValue>,
    ) -> Result<bool> {
        self.store_value(key.into(), data.into(), Some(version))
    }

    /// Write many values, batching the store call when possible.
    pub fn set_many(&mut self, entries: Vec<(CacheKey, CacheValue)>) -> Result<usize> {
        self.ensure_invalidation_processed()?;
        if let Some(next) = self.next.as_mut() {
            next.set_many(entries.clone())?;
        }

        let expiry = self.ttl_expiry();
        let mut wrapped_entries = Vec::with_capacity(entries.len());
        for (key, data) in entries {
            let wrapped = StoredValue::compose(data, expiry, None);
            if let Some(accel) = self.acceleration.as_mut() {
                accel.set(key.clone(), wrapped.clone().without_ttl())?;
            }
            wrapped_entries.push((self.parse_key(&key), wrapped));
        }

        if self.definition.require_locking {
            let mut stored = 0;
            for (parsed, value) in wrapped_entries {
                if self.write_to_store(&parsed, value)? {
                    stored += 1;
                }
            }
            Ok(stored)
        } else {
            match self.store.set_many(wrapped_entries) {
                Ok(count) => Ok(count),
                Err(e) if e.is_store_fault() => {
                    warn!("cache {}: batched write fault: {}", self.definition.id(), e);
                    Ok(0)
                }
                Err(e) => Err(e),
            }
        }
    }

    /// Whether `key` is present, without fetching it when the store can
    /// answer directly.
    pub fn has(&mut self, key: impl Into<CacheKey>) -> Result<bool> {
        let key = key.into();
        self.ensure_invalidation_processed()?;
        if self.accel_has(&key) {
            return Ok(true);
        }
        if self.store_answers_has() {
            let parsed = self.parse_key(&key);
            let result = self.store.has(&parsed);
            return self.read_or_miss(result, false);
        }
        Ok(self.fetch(&key, None)?.is_some())
    }

    /// Whether every key is present.
    pub fn has_all(&mut self, keys: &[CacheKey]) -> Result<bool> {
        self.ensure_invalidation_processed()?;
        if self.store_answers_has() {
            let unaccelerated: Vec<ParsedKey> = keys
                .iter()
                .filter(|key| !self.accel_has(key))
                .map(|key| self.parse_key(key))
                .collect();
            if unaccelerated.is_empty() {
                return Ok(true);
            }
            let result = self.store.has_all(&unaccelerated);
            return self.read_or_miss(result, false);
        }
        for key in keys {
            if self.fetch(key, None)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether at least one key is present.
    pub fn has_any(&mut self, keys: &[CacheKey]) -> Result<bool> {
        self.ensure_invalidation_processed()?;
        if keys.iter().any(|key| self.accel_has(key)) {
            return Ok(true);
        }
        if self.store_answers_has() {
            let parsed: Vec<ParsedKey> = keys.iter().map(|key| self.parse_key(key)).collect();
            let result = self.store.has_any(&parsed);
            return self.read_or_miss(result, false);
        }
        for key in keys {
            if self.fetch(key, None)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Delete a key, dropping it from acceleration, the chain (when
    /// `recurse` is set) and the local store.
    pub fn delete(&mut self, key: impl Into<CacheKey>, recurse: bool) -> Result<bool> {
        let key = key.into();
        self.ensure_invalidation_processed()?;
        if let Some(accel) = self.acceleration.as_mut() {
            accel.delete(&key);
        }
        if recurse {
            if let Some(next) = self.next.as_mut() {
                next.delete(key.clone(), true)?;
            }
        }
        let parsed = self.parse_key(&key);
        match self.store.delete(&parsed) {
            Ok(existed) => Ok(existed),
            Err(e) if e.is_store_fault() => {
                warn!("cache {}: delete fault: {}", self.definition.id(), e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete many keys, batching the store call.
    pub fn delete_many(&mut self, keys: &[CacheKey], recurse: bool) -> Result<usize> {
        self.ensure_invalidation_processed()?;
        if let Some(accel) = self.acceleration.as_mut() {
            for key in keys {
                accel.delete(key);
            }
        }
        if recurse {
            if let Some(next) = self.next.as_mut() {
                next.delete_many(keys, true)?;
            }
        }
        let parsed: Vec<ParsedKey> = keys.iter().map(|key| self.parse_key(key)).collect();
        match self.store.delete_many(&parsed) {
            Ok(deleted) => Ok(deleted),
            Err(e) if e.is_store_fault() => {
                warn!("cache {}: batched delete fault: {}", self.definition.id(), e);
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Empty the acceleration tier, the local store and the rest of the
    /// chain.
    pub fn purge(&mut self) -> Result<()> {
        self.ensure_invalidation_processed()?;
        if let Some(accel) = self.acceleration.as_mut() {
            accel.purge();
        }
        self.store.purge()?;
        if let Some(next) = self.next.as_mut() {
            next.purge()?;
        }
        Ok(())
    }

    /// Replace the definition identifiers, reporting whether they changed.
    ///
    /// A change redirects every parsed key, so the acceleration tier is
    /// emptied and the chain updated to match.
    pub fn set_identifiers(&mut self, identifiers: BTreeMap<String, String>) -> bool {
        let changed = self.definition.set_identifiers(identifiers.clone());
        if changed {
            if let Some(accel) = self.acceleration.as_mut() {
                accel.purge();
            }
        }
        if let Some(next) = self.next.as_mut() {
            next.set_identifiers(identifiers);
        }
        changed
    }

    // ---- read path internals ----

    /// Tiered lookup returning the final value and the version it carried.
    fn fetch(
        &mut self,
        key: &CacheKey,
        required_version: Option<u64>,
    ) -> Result<Option<(CacheValue, Option<u64>)>> {
        let accel_entry = match self.acceleration.as_mut() {
            Some(accel) => accel.get(key)?,
            None => None,
        };
        if let Some(entry) = accel_entry {
            let satisfied = match (required_version, entry.version()) {
                (None, _) => true,
                (Some(required), Some(version)) => version >= required,
                (Some(_), None) => false,
            };
            if satisfied {
                let version = entry.version();
                let value = self.materialise(entry.unwrap_version().into_value())?;
                return Ok(Some((value, version)));
            }
        }

        let parsed = self.parse_key(key);
        let stored = {
            let result = self.store.get(&parsed);
            self.read_or_miss(result, None)?
        };

        if let Some(stored) = stored {
            if let Some((payload, version)) = self.validate(stored, &parsed, required_version)? {
                if let Some(accel) = self.acceleration.as_mut() {
                    accel.set(
                        key.clone(),
                        StoredValue::compose(payload.clone(), None, version),
                    )?;
                }
                let value = self.materialise(payload)?;
                let value = refsafe::detach(value, &self.capabilities, &self.definition)?;
                return Ok(Some((value, version)));
            }
        }

        let fallback = if let Some(next) = self.next.as_mut() {
            next.fetch(key, required_version)?
        } else if let Some(source) = self.source.clone() {
            self.load_from_source(source.as_ref(), key, required_version)?
        } else {
            None
        };

        if let Some((value, actual_version)) = fallback {
            self.backfill(key, value.clone(), actual_version)?;
            let value = self.materialise(value)?;
            return Ok(Some((value, actual_version)));
        }
        Ok(None)
    }

    fn load_from_source(
        &self,
        source: &dyn DataSource,
        key: &CacheKey,
        required_version: Option<u64>,
    ) -> Result<Option<(CacheValue, Option<u64>)>> {
        match required_version {
            None => Ok(source.load_for_cache(key)?.map(|value| (value, None))),
            Some(required) => {
                if !source.supports_versioning() {
                    return Err(CacheError::Contract(format!(
                        "cache {} asked its non-versionable data source for a versioned read",
                        self.definition.id()
                    )));
                }
                match source.load_for_cache_versioned(key, required)? {
                    Some((value, actual)) => {
                        if actual < required {
                            return Err(CacheError::Contract(format!(
                                "data source for cache {} returned version {} older than the required {}",
                                self.definition.id(),
                                actual,
                                required
                            )));
                        }
                        Ok(Some((value, Some(actual))))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Check the envelope of a retrieved entry against the read's version
    /// expectation, self-healing mismatches and expiring dead TTL entries.
    fn validate(
        &self,
        stored: StoredValue,
        parsed: &ParsedKey,
        required_version: Option<u64>,
    ) -> Result<Option<(CacheValue, Option<u64>)>> {
        let version = stored.version();
        match (required_version, version) {
            (None, Some(_)) => {
                self.heal(parsed);
                return Err(CacheError::Contract(format!(
                    "cache {} holds a versioned entry for {} but was read without a version",
                    self.definition.id(),
                    parsed
                )));
            }
            (Some(_), None) => {
                self.heal(parsed);
                return Err(CacheError::Contract(format!(
                    "cache {} holds an unversioned entry for {} but was read with a version",
                    self.definition.id(),
                    parsed
                )));
            }
            (Some(required), Some(actual)) if actual < required => {
                // Outdated: delete now so concurrent readers stop pulling a
                // stale payload while the refetch is in flight.
                if let Err(e) = self.store.delete(parsed) {
                    warn!(
                        "cache {}: could not drop outdated entry {}: {}",
                        self.definition.id(),
                        parsed,
                        e
                    );
                }
                return Ok(None);
            }
            _ => {}
        }

        let inner = stored.unwrap_version();
        if inner.has_expired(clock::now_secs()) {
            if let Err(e) = self.store.delete(parsed) {
                warn!(
                    "cache {}: could not drop expired entry {}: {}",
                    self.definition.id(),
                    parsed,
                    e
                );
            }
            return Ok(None);
        }
        Ok(Some((inner.into_value(), version)))
    }

    /// Restore a cached-object marker into its domain representation.
    fn materialise(&self, value: CacheValue) -> Result<CacheValue> {
        match value {
            CacheValue::CachedObject(marker) => marker.restore(),
            other => Ok(other),
        }
    }

    fn heal(&self, parsed: &ParsedKey) {
        if let Err(e) = self.store.delete(parsed) {
            warn!(
                "cache {}: self-heal delete of {} failed: {}",
                self.definition.id(),
                parsed,
                e
            );
        }
    }

    fn finish(
        &self,
        key: &CacheKey,
        value: Option<CacheValue>,
        strictness: Strictness,
    ) -> Result<Option<CacheValue>> {
        if value.is_none() && strictness == Strictness::MustExist {
            return Err(CacheError::Contract(format!(
                "required key {} missing from cache {}",
                key,
                self.definition.id()
            )));
        }
        Ok(value)
    }

    // ---- write path internals ----

    fn store_value(
        &mut self,
        key: CacheKey,
        data: CacheValue,
        version: Option<u64>,
    ) -> Result<bool> {
        self.ensure_invalidation_processed()?;
        if let Some(next) = self.next.as_mut() {
            next.store_value(key.clone(), data.clone(), version)?;
        }

        let wrapped = StoredValue::compose(data, self.ttl_expiry(), version);
        if let Some(accel) = self.acceleration.as_mut() {
            accel.set(key.clone(), wrapped.clone().without_ttl())?;
        }
        let parsed = self.parse_key(&key);
        self.write_to_store(&parsed, wrapped)
    }

    /// Resolve a miss into the local tier only; ancestors already produced
    /// the value and descendants supplied it.
    fn backfill(&mut self, key: &CacheKey, data: CacheValue, version: Option<u64>) -> Result<()> {
        let wrapped = StoredValue::compose(data, self.ttl_expiry(), version);
        if let Some(accel) = self.acceleration.as_mut() {
            accel.set(key.clone(), wrapped.clone().without_ttl())?;
        }
        let parsed = self.parse_key(key);
        self.write_to_store(&parsed, wrapped)?;
        Ok(())
    }

    /// One store write under the locking discipline: reuse a lock the
    /// caller already holds, otherwise acquire around the write and release
    /// on every exit path.
    fn write_to_store(&self, parsed: &ParsedKey, value: StoredValue) -> Result<bool> {
        let guard = if self.definition.require_locking {
            let scope = self.definition.hash();
            match lock::lock_state(self.store.as_ref(), &scope, parsed, &self.lock_owner)? {
                LockState::Held => None,
                _ => Some(lock::acquire(
                    self.store.as_ref(),
                    &scope,
                    parsed,
                    &self.lock_owner,
                    lock::LOCK_TIMEOUT,
                )?),
            }
        } else {
            None
        };

        let result = self.store.set(parsed, value);

        if let Some(guard) = guard {
            guard.release()?;
        }

        match result {
            Ok(stored) => Ok(stored),
            Err(e) if e.is_store_fault() => {
                warn!("cache {}: write fault: {}", self.definition.id(), e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ---- shared internals ----

    fn parse_key(&self, key: &CacheKey) -> ParsedKey {
        key::parse(key, &self.definition, self.capabilities.multiple_identifiers)
    }

    fn ttl_expiry(&self) -> Option<u64> {
        if self.definition.ttl > 0 && !self.capabilities.native_ttl {
            Some(clock::now_secs() + self.definition.ttl)
        } else {
            None
        }
    }

    fn accel_has(&self, key: &CacheKey) -> bool {
        self.acceleration
            .as_ref()
            .map_or(false, |accel| accel.has(key))
    }

    fn store_answers_has(&self) -> bool {
        self.capabilities.key_aware
            && (self.definition.ttl == 0 || self.capabilities.native_ttl)
    }

    fn read_or_miss<T>(&self, result: Result<T>, miss: T) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_store_fault() => {
                warn!(
                    "cache {}: store read fault treated as miss: {}",
                    self.definition.id(),
                    e
                );
                Ok(miss)
            }
            Err(e) => Err(e),
        }
    }

    // ---- event invalidation ----

    /// Run the event-invalidation pass once per loader, on the first public
    /// operation.
    fn ensure_invalidation_processed(&mut self) -> Result<()> {
        if self.invalidation_processed {
            return Ok(());
        }
        self.invalidation_processed = true;

        let channel = match &self.event_channel {
            Some(channel) => channel.clone(),
            None => return Ok(()),
        };
        if self.definition.invalidation_events.is_empty() {
            return Ok(());
        }

        let last_key = self.parse_key(&CacheKey::from(invalidation::LAST_INVALIDATION_KEY));
        let last = match self.store.get(&last_key) {
            Ok(Some(StoredValue::Raw(CacheValue::Str(token)))) => token,
            Ok(Some(_)) => {
                // Unexpected shape: heal and start over from a fresh token.
                self.heal(&last_key);
                self.store.set(
                    &last_key,
                    StoredValue::Raw(CacheValue::Str(clock::purge_token())),
                )?;
                return Err(CacheError::Integrity(format!(
                    "cache {} held a malformed lastinvalidation entry",
                    self.definition.id()
                )));
            }
            Ok(None) => {
                // A fresh cache has nothing to invalidate.
                self.store.set(
                    &last_key,
                    StoredValue::Raw(CacheValue::Str(clock::purge_token())),
                )?;
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "cache {}: could not read lastinvalidation: {}",
                    self.definition.id(),
                    e
                );
                return Ok(());
            }
        };

        if last == clock::purge_token() {
            return Ok(());
        }

        let mut records = Vec::with_capacity(self.definition.invalidation_events.len());
        for event in &self.definition.invalidation_events {
            records.push(channel.record(event)?);
        }
        let plan = invalidation::plan(&records, &last);
        if plan.is_empty() {
            return Ok(());
        }

        debug!(
            "cache {}: invalidation pass purges={} deletes {} key(s)",
            self.definition.id(),
            plan.purge,
            plan.keys.len()
        );
        if plan.purge {
            self.purge()?;
        } else {
            self.delete_many(&plan.keys, true)?;
        }
        self.store.set(
            &last_key,
            StoredValue::Raw(CacheValue::Str(clock::new_purge_token())),
        )?;
        Ok(())
    }
}
