//! Value envelopes
//!
//! Entries are written to a store wrapped in up to two envelopes: a TTL
//! wrapper carrying the absolute expiry instant (only when the cache has a
//! TTL and the store has no native TTL support), and a version wrapper
//! carrying the writer-chosen version. The version wrapper is always the
//! outermost of the two. Readers peel the wrappers in reverse order.

use serde::{Deserialize, Serialize};

use crate::value::CacheValue;

/// An entry as persisted in a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    /// Bare payload, no envelope
    Raw(CacheValue),
    /// Payload with a loader-side expiry instant (seconds since the epoch)
    Ttl {
        /// The wrapped payload
        data: CacheValue,
        /// Absolute expiry; the entry is dead once `now >= expires_at`
        expires_at: u64,
    },
    /// Version-tagged entry; the inner value is never itself `Versioned`
    Versioned {
        /// The wrapped entry (`Raw` or `Ttl`)
        data: Box<StoredValue>,
        /// Writer-chosen, monotonically increasing version
        version: u64,
    },
}

impl StoredValue {
    /// Compose the write-side envelope: payload, then TTL wrapper if
    /// `expires_at` is given, then version wrapper if `version` is given.
    pub fn compose(data: CacheValue, expires_at: Option<u64>, version: Option<u64>) -> StoredValue {
        let inner = match expires_at {
            Some(expires_at) => StoredValue::Ttl { data, expires_at },
            None => StoredValue::Raw(data),
        };
        match version {
            Some(version) => StoredValue::Versioned {
                data: Box::new(inner),
                version,
            },
            None => inner,
        }
    }

    /// The version tag, if this entry is version-wrapped.
    pub fn version(&self) -> Option<u64> {
        match self {
            StoredValue::Versioned { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// Strip the version wrapper, leaving the `Raw` or `Ttl` inner entry.
    pub fn unwrap_version(self) -> StoredValue {
        match self {
            StoredValue::Versioned { data, .. } => *data,
            other => other,
        }
    }

    /// Whether this entry (or the entry inside its version wrapper) carries
    /// an expiry that has passed.
    pub fn has_expired(&self, now: u64) -> bool {
        match self {
            StoredValue::Ttl { expires_at, .. } => now >= *expires_at,
            StoredValue::Versioned { data, .. } => data.has_expired(now),
            StoredValue::Raw(_) => false,
        }
    }

    /// Unwrap down to the payload, discarding any envelopes.
    pub fn into_value(self) -> CacheValue {
        match self {
            StoredValue::Raw(data) => data,
            StoredValue::Ttl { data, .. } => data,
            StoredValue::Versioned { data, .. } => data.into_value(),
        }
    }

    /// Drop the TTL wrapper while keeping the version wrapper, the form the
    /// static-acceleration tier stores.
    pub fn without_ttl(self) -> StoredValue {
        match self {
            StoredValue::Ttl { data, .. } => StoredValue::Raw(data),
            StoredValue::Versioned { data, version } => StoredValue::Versioned {
                data: Box::new(data.without_ttl()),
                version,
            },
            raw => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_version_outermost() {
        let value = StoredValue::compose(CacheValue::Int(7), Some(100), Some(3));
        match value {
            StoredValue::Versioned { data, version } => {
                assert_eq!(version, 3);
                assert!(matches!(*data, StoredValue::Ttl { expires_at: 100, .. }));
            }
            other => panic!("expected versioned entry, got {:?}", other),
        }
    }

    #[test]
    fn test_compose_bare() {
        let value = StoredValue::compose(CacheValue::Int(7), None, None);
        assert_eq!(value, StoredValue::Raw(CacheValue::Int(7)));
    }

    #[test]
    fn test_expiry_boundary() {
        let value = StoredValue::compose(CacheValue::Int(1), Some(10), None);
        assert!(!value.has_expired(9));
        assert!(value.has_expired(10));
        assert!(value.has_expired(11));
    }

    #[test]
    fn test_expiry_inside_version_wrapper() {
        let value = StoredValue::compose(CacheValue::Int(1), Some(10), Some(2));
        assert!(!value.has_expired(9));
        assert!(value.has_expired(10));
    }

    #[test]
    fn test_unwrap_order() {
        let value = StoredValue::compose(CacheValue::Str("v".to_string()), Some(50), Some(9));
        assert_eq!(value.version(), Some(9));

        let inner = value.unwrap_version();
        assert_eq!(inner.version(), None);
        assert_eq!(inner.into_value(), CacheValue::Str("v".to_string()));
    }

    #[test]
    fn test_without_ttl_keeps_version() {
        let value = StoredValue::compose(CacheValue::Int(4), Some(60), Some(5));
        let stripped = value.without_ttl();
        match stripped {
            StoredValue::Versioned { data, version } => {
                assert_eq!(version, 5);
                assert_eq!(*data, StoredValue::Raw(CacheValue::Int(4)));
            }
            other => panic!("expected versioned entry, got {:?}", other),
        }
    }
}
