//! Static-acceleration tier
//!
//! A request-scoped, bounded LRU sitting in front of a loader's store,
//! keyed by the caller's unparsed key. Two parallel views back it: the
//! entry table and an insertion-order queue whose tail is the most recently
//! used key. Values are kept as-is when they are cheap to hand back
//! (scalars, simple-data definitions, cached-object markers) and as
//! serialized bytes otherwise, so the tier never shares mutable state with
//! its callers.

use std::collections::{HashMap, VecDeque};

use crate::envelope::StoredValue;
use crate::error::{CacheError, Result};
use crate::value::{CacheKey, CacheValue};

#[derive(Debug, Clone)]
enum AccelPayload {
    Direct(StoredValue),
    Serialized(Vec<u8>),
}

/// Per-loader request-scoped LRU tier
pub(crate) struct StaticAcceleration {
    entries: HashMap<CacheKey, AccelPayload>,
    order: VecDeque<CacheKey>,
    bound: Option<usize>,
    simple_data: bool,
}

impl StaticAcceleration {
    pub(crate) fn new(bound: Option<usize>, simple_data: bool) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            bound,
            simple_data,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Membership only; TTL and version stay the caller's to validate.
    pub(crate) fn has(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn get(&mut self, key: &CacheKey) -> Result<Option<StoredValue>> {
        let payload = match self.entries.get(key) {
            Some(payload) => payload.clone(),
            None => return Ok(None),
        };

        if self.bound.is_some() && self.entries.len() > 1 {
            self.move_to_tail(key);
        }

        let value = match payload {
            AccelPayload::Direct(value) => value,
            AccelPayload::Serialized(bytes) => bincode::deserialize(&bytes).map_err(|e| {
                CacheError::Serialization(format!("acceleration entry decode: {}", e))
            })?,
        };
        Ok(Some(value))
    }

    pub(crate) fn set(&mut self, key: CacheKey, value: StoredValue) -> Result<()> {
        if self.entries.remove(&key).is_some() {
            self.remove_from_order(&key);
        }

        let payload = if self.store_direct(&value) {
            AccelPayload::Direct(value)
        } else {
            let bytes = bincode::serialize(&value).map_err(|e| {
                CacheError::Serialization(format!("acceleration entry encode: {}", e))
            })?;
            AccelPayload::Serialized(bytes)
        };

        self.entries.insert(key.clone(), payload);
        self.order.push_back(key);

        if let Some(bound) = self.bound {
            if self.entries.len() > bound {
                if let Some(evicted) = self.order.pop_front() {
                    self.entries.remove(&evicted);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn delete(&mut self, key: &CacheKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.remove_from_order(key);
            true
        } else {
            false
        }
    }

    pub(crate) fn purge(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Scalars, simple-data definitions and cached-object markers are safe
    /// to keep in their direct form; everything else is stored serialized.
    fn store_direct(&self, value: &StoredValue) -> bool {
        if self.simple_data {
            return true;
        }
        let payload = match value {
            StoredValue::Versioned { data, .. } => match data.as_ref() {
                StoredValue::Raw(payload) | StoredValue::Ttl { data: payload, .. } => payload,
                StoredValue::Versioned { .. } => return false,
            },
            StoredValue::Raw(payload) | StoredValue::Ttl { data: payload, .. } => payload,
        };
        payload.is_scalar() || matches!(payload, CacheValue::CachedObject(_))
    }

    fn move_to_tail(&mut self, key: &CacheKey) {
        self.remove_from_order(key);
        self.order.push_back(key.clone());
    }

    fn remove_from_order(&mut self, key: &CacheKey) {
        if let Some(position) = self.order.iter().position(|queued| queued == key) {
            self.order.remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn raw(value: i64) -> StoredValue {
        StoredValue::Raw(CacheValue::Int(value))
    }

    fn map_value(field: i64) -> StoredValue {
        let mut map = BTreeMap::new();
        map.insert("field".to_string(), CacheValue::Int(field));
        StoredValue::Raw(CacheValue::Map(map))
    }

    #[test]
    fn test_round_trip_direct_and_serialized() {
        let mut accel = StaticAcceleration::new(None, false);

        accel.set(CacheKey::from("scalar"), raw(1)).unwrap();
        accel.set(CacheKey::from("map"), map_value(2)).unwrap();

        assert_eq!(accel.get(&CacheKey::from("scalar")).unwrap(), Some(raw(1)));
        assert_eq!(accel.get(&CacheKey::from("map")).unwrap(), Some(map_value(2)));
    }

    #[test]
    fn test_bound_evicts_least_recently_used() {
        let mut accel = StaticAcceleration::new(Some(2), false);

        accel.set(CacheKey::from("a"), raw(1)).unwrap();
        accel.set(CacheKey::from("b"), raw(2)).unwrap();
        accel.set(CacheKey::from("c"), raw(3)).unwrap();

        assert!(!accel.has(&CacheKey::from("a")));
        assert!(accel.has(&CacheKey::from("b")));
        assert!(accel.has(&CacheKey::from("c")));
        assert_eq!(accel.len(), 2);
    }

    #[test]
    fn test_hit_refreshes_order() {
        let mut accel = StaticAcceleration::new(Some(2), false);

        accel.set(CacheKey::from("a"), raw(1)).unwrap();
        accel.set(CacheKey::from("b"), raw(2)).unwrap();

        // Touch "a" so "b" becomes the eviction candidate.
        accel.get(&CacheKey::from("a")).unwrap();
        accel.set(CacheKey::from("c"), raw(3)).unwrap();

        assert!(accel.has(&CacheKey::from("a")));
        assert!(!accel.has(&CacheKey::from("b")));
        assert!(accel.has(&CacheKey::from("c")));
    }

    #[test]
    fn test_overwrite_does_not_grow_count() {
        let mut accel = StaticAcceleration::new(Some(2), false);

        accel.set(CacheKey::from("a"), raw(1)).unwrap();
        accel.set(CacheKey::from("a"), raw(2)).unwrap();

        assert_eq!(accel.len(), 1);
        assert_eq!(accel.get(&CacheKey::from("a")).unwrap(), Some(raw(2)));
    }

    #[test]
    fn test_delete_and_purge_keep_views_aligned() {
        let mut accel = StaticAcceleration::new(Some(4), false);

        accel.set(CacheKey::from("a"), raw(1)).unwrap();
        accel.set(CacheKey::from("b"), raw(2)).unwrap();

        assert!(accel.delete(&CacheKey::from("a")));
        assert!(!accel.delete(&CacheKey::from("a")));
        assert_eq!(accel.len(), 1);
        assert_eq!(accel.order.len(), 1);

        accel.purge();
        assert_eq!(accel.len(), 0);
        assert_eq!(accel.order.len(), 0);
    }

    #[test]
    fn test_simple_data_stores_direct() {
        let accel = StaticAcceleration::new(None, true);
        assert!(accel.store_direct(&map_value(1)));

        let strict = StaticAcceleration::new(None, false);
        assert!(!strict.store_direct(&map_value(1)));
        assert!(strict.store_direct(&raw(1)));
    }

    #[test]
    fn test_versioned_scalar_stays_direct() {
        let accel = StaticAcceleration::new(None, false);
        let versioned = StoredValue::compose(CacheValue::Int(5), None, Some(2));
        assert!(accel.store_direct(&versioned));
    }

    proptest! {
        #[test]
        fn prop_bound_holds_and_views_stay_aligned(
            keys in proptest::collection::vec(0i64..20, 1..64),
            bound in 1usize..8,
        ) {
            let mut accel = StaticAcceleration::new(Some(bound), false);
            for key in keys {
                accel.set(CacheKey::from(key), raw(key)).unwrap();
                prop_assert!(accel.len() <= bound);
                prop_assert_eq!(accel.len(), accel.order.len());
            }
        }
    }
}
