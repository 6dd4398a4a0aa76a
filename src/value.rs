//! Caller-facing key and value model
//!
//! Keys are scalars (strings or integers). Values are dynamic payloads that
//! the facade can serialize, deep-copy, and wrap in envelopes without knowing
//! the caller's concrete types. Domain objects opt in to caching through the
//! [`Cacheable`] trait: on write they collapse into an opaque
//! [`CachedObject`] marker, on read the marker is restored through a
//! process-global wake registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// A caller-supplied cache key: a string or integer scalar
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheKey {
    /// String key
    Str(String),
    /// Integer key
    Int(i64),
}

impl CacheKey {
    /// Render the key the way it is embedded into parsed store keys.
    pub fn as_store_string(&self) -> String {
        match self {
            CacheKey::Str(s) => s.clone(),
            CacheKey::Int(i) => i.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Str(s) => write!(f, "{}", s),
            CacheKey::Int(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        CacheKey::Str(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        CacheKey::Str(s)
    }
}

impl From<i64> for CacheKey {
    fn from(i: i64) -> Self {
        CacheKey::Int(i)
    }
}

/// A dynamic cache payload
///
/// `Bool`, `Int`, `Float` and `Str` are the scalar forms; `Array` and `Map`
/// are the container forms the reference-safety policy cares about.
/// `CachedObject` is the opaque marker a [`Cacheable`] value collapses into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// Floating-point scalar
    Float(f64),
    /// String scalar
    Str(String),
    /// Raw byte payload
    Bytes(Vec<u8>),
    /// Ordered list of values
    Array(Vec<CacheValue>),
    /// String-keyed record
    Map(BTreeMap<String, CacheValue>),
    /// Marker for a cacheable domain object
    CachedObject(CachedObject),
}

impl CacheValue {
    /// Whether this value is a scalar (never needs reference breaking).
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            CacheValue::Bool(_) | CacheValue::Int(_) | CacheValue::Float(_) | CacheValue::Str(_)
        )
    }

    /// Build a value from a cacheable domain object, collapsing it into its
    /// marker form.
    pub fn from_cacheable<T: Cacheable>(object: &T) -> CacheValue {
        CacheValue::CachedObject(CachedObject {
            type_tag: T::type_tag().to_string(),
            data: Box::new(object.prepare_to_cache()),
        })
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        CacheValue::Str(s.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> Self {
        CacheValue::Str(s)
    }
}

impl From<i64> for CacheValue {
    fn from(i: i64) -> Self {
        CacheValue::Int(i)
    }
}

impl From<bool> for CacheValue {
    fn from(b: bool) -> Self {
        CacheValue::Bool(b)
    }
}

/// Opaque marker standing in for a cacheable domain object
///
/// The marker is immutable once constructed; neither field is reachable
/// mutably, so handing the marker out of the acceleration tier cannot leak
/// shared mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedObject {
    type_tag: String,
    data: Box<CacheValue>,
}

impl CachedObject {
    /// The registered type tag this marker restores through.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The prepared payload held by the marker.
    pub fn data(&self) -> &CacheValue {
        &self.data
    }

    /// Restore the domain representation through the wake registry.
    pub fn restore(&self) -> Result<CacheValue> {
        let registry = WAKE_REGISTRY.read();
        let wake = registry.get(&self.type_tag).ok_or_else(|| {
            CacheError::Contract(format!(
                "No wake hook registered for cached object type '{}'",
                self.type_tag
            ))
        })?;
        Ok(wake(&self.data))
    }
}

/// Restore hook: rebuilds the domain representation from the prepared payload
pub type WakeFn = fn(&CacheValue) -> CacheValue;

static WAKE_REGISTRY: Lazy<RwLock<HashMap<String, WakeFn>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a wake hook for a cached-object type tag.
///
/// Registration is process-wide and idempotent; re-registering a tag
/// replaces the hook.
pub fn register_wake_hook(type_tag: &str, wake: WakeFn) {
    WAKE_REGISTRY.write().insert(type_tag.to_string(), wake);
}

/// Trait for domain objects that know how to cache themselves
///
/// On write the facade stores `prepare_to_cache()` behind a marker carrying
/// [`Cacheable::type_tag`]; on read the marker is woken through the hook
/// registered with [`register_wake_hook`].
pub trait Cacheable {
    /// Stable tag identifying this type in the wake registry.
    fn type_tag() -> &'static str;

    /// Produce the representation to store.
    fn prepare_to_cache(&self) -> CacheValue;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Session {
        user: String,
        hits: i64,
    }

    impl Cacheable for Session {
        fn type_tag() -> &'static str {
            "test::session"
        }

        fn prepare_to_cache(&self) -> CacheValue {
            let mut map = BTreeMap::new();
            map.insert("user".to_string(), CacheValue::Str(self.user.clone()));
            map.insert("hits".to_string(), CacheValue::Int(self.hits));
            CacheValue::Map(map)
        }
    }

    fn wake_session(data: &CacheValue) -> CacheValue {
        // Restored form carries a marker field so tests can tell it apart
        // from the prepared payload.
        let mut map = match data {
            CacheValue::Map(m) => m.clone(),
            _ => BTreeMap::new(),
        };
        map.insert("restored".to_string(), CacheValue::Bool(true));
        CacheValue::Map(map)
    }

    #[test]
    fn test_scalar_classification() {
        assert!(CacheValue::Int(1).is_scalar());
        assert!(CacheValue::Str("x".to_string()).is_scalar());
        assert!(!CacheValue::Array(vec![]).is_scalar());
        assert!(!CacheValue::Bytes(vec![1]).is_scalar());
    }

    #[test]
    fn test_key_store_string() {
        assert_eq!(CacheKey::from("user").as_store_string(), "user");
        assert_eq!(CacheKey::from(42).as_store_string(), "42");
    }

    #[test]
    fn test_cached_object_round_trip() {
        register_wake_hook("test::session", wake_session);

        let session = Session {
            user: "ada".to_string(),
            hits: 3,
        };
        let value = CacheValue::from_cacheable(&session);

        let marker = match &value {
            CacheValue::CachedObject(m) => m,
            other => panic!("expected marker, got {:?}", other),
        };
        assert_eq!(marker.type_tag(), "test::session");

        let restored = marker.restore().unwrap();
        match restored {
            CacheValue::Map(map) => {
                assert_eq!(map.get("user"), Some(&CacheValue::Str("ada".to_string())));
                assert_eq!(map.get("restored"), Some(&CacheValue::Bool(true)));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_wake_hook_is_contract_error() {
        let marker = CachedObject {
            type_tag: "test::unregistered".to_string(),
            data: Box::new(CacheValue::Int(1)),
        };
        assert!(matches!(marker.restore(), Err(CacheError::Contract(_))));
    }
}
