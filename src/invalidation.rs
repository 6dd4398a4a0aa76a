//! Event-driven invalidation
//!
//! A well-known cache (`core/eventinvalidation`) stores one record per event
//! name: a mapping of caller keys to the purge token current when the key
//! was invalidated, plus the distinguished `"purged"` key meaning the whole
//! cache was purged at that token. Loaders remember the last token they
//! processed in their own store and, on their next operation, schedule
//! deletions for every record entry strictly newer than it. Tokens minted in
//! the same second as the remembered one are treated as concurrent and left
//! alone; that tolerates another process clearing the cache mid-request.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::clock;
use crate::definition::Definition;
use crate::envelope::StoredValue;
use crate::error::Result;
use crate::key::{self, ParsedKey};
use crate::store::Store;
use crate::value::{CacheKey, CacheValue};

/// Record key meaning "the whole cache was purged at this token"
pub const PURGED_KEY: &str = "purged";

/// Reserved caller key a loader remembers its last processed token under
pub const LAST_INVALIDATION_KEY: &str = "lastinvalidation";

/// Producer/consumer handle for the event-invalidation cache
#[derive(Clone)]
pub struct EventChannel {
    store: Arc<dyn Store>,
    definition: Definition,
}

impl EventChannel {
    /// Wrap the store backing the `core/eventinvalidation` cache.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            definition: Definition::new("core", "eventinvalidation").with_simple_data(),
        }
    }

    fn event_key(&self, event: &str) -> ParsedKey {
        key::parse(
            &CacheKey::from(event),
            &self.definition,
            self.store.capabilities().multiple_identifiers,
        )
    }

    /// Record `keys` as invalidated by `event` at a fresh purge token.
    pub fn invalidate(&self, event: &str, keys: &[CacheKey]) -> Result<String> {
        let token = clock::new_purge_token();
        let mut record = self.record(event)?;
        for key in keys {
            record.insert(key.as_store_string(), token.clone());
        }
        debug!(
            "invalidation event '{}': {} key(s) at token {}",
            event,
            keys.len(),
            token
        );
        self.write_record(event, record)?;
        Ok(token)
    }

    /// Record a whole-cache purge for `event` at a fresh purge token.
    pub fn purge(&self, event: &str) -> Result<String> {
        let token = clock::new_purge_token();
        let mut record = self.record(event)?;
        record.insert(PURGED_KEY.to_string(), token.clone());
        debug!("invalidation event '{}': purge at token {}", event, token);
        self.write_record(event, record)?;
        Ok(token)
    }

    /// The current `key -> token` record for `event`; empty if none exists.
    pub fn record(&self, event: &str) -> Result<BTreeMap<String, String>> {
        let stored = self.store.get(&self.event_key(event))?;
        let mut record = BTreeMap::new();
        if let Some(StoredValue::Raw(CacheValue::Map(entries))) = stored {
            for (key, value) in entries {
                if let CacheValue::Str(token) = value {
                    record.insert(key, token);
                }
            }
        }
        Ok(record)
    }

    fn write_record(&self, event: &str, record: BTreeMap<String, String>) -> Result<()> {
        let entries = record
            .into_iter()
            .map(|(key, token)| (key, CacheValue::Str(token)))
            .collect();
        self.store.set(
            &self.event_key(event),
            StoredValue::Raw(CacheValue::Map(entries)),
        )?;
        Ok(())
    }
}

/// The work one invalidation pass schedules
#[derive(Debug, Default, PartialEq)]
pub struct InvalidationPlan {
    /// The whole cache must be purged
    pub purge: bool,
    /// Keys to delete (unique, ignored when `purge` is set)
    pub keys: Vec<CacheKey>,
}

impl InvalidationPlan {
    /// Whether the pass scheduled anything at all.
    pub fn is_empty(&self) -> bool {
        !self.purge && self.keys.is_empty()
    }
}

/// Decide what a loader must invalidate given the event records and the
/// token it last processed.
///
/// Only entries strictly newer than `last_invalidation` by microtime prefix
/// count; concurrent tokens (equal prefix, different suffix) are left alone.
pub fn plan(records: &[BTreeMap<String, String>], last_invalidation: &str) -> InvalidationPlan {
    let mut plan = InvalidationPlan::default();
    for record in records {
        for (key, token) in record {
            if clock::compare(token, last_invalidation) != std::cmp::Ordering::Greater {
                continue;
            }
            if key == PURGED_KEY {
                plan.purge = true;
            } else {
                let key = CacheKey::Str(key.clone());
                if !plan.keys.contains(&key) {
                    plan.keys.push(key);
                }
            }
        }
    }
    plan
}
