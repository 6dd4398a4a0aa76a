//! Reference safety
//!
//! Some stores hand back the very value they were handed, so a caller could
//! mutate cached state through the returned reference. Unless the
//! definition declares simple data or the store dereferences on retrieval,
//! non-scalar values are detached before they reach the caller: shallow
//! plain graphs get a structural deep copy, deep or opaque graphs take the
//! serialize/deserialize round trip.

use crate::definition::Definition;
use crate::error::{CacheError, Result};
use crate::store::StoreCapabilities;
use crate::value::CacheValue;

/// Nesting depth past which the byte round trip beats a structural copy.
const MAX_PLAIN_DEPTH: usize = 5;

/// Detach `value` from any state the store may still share with it.
pub fn detach(
    value: CacheValue,
    capabilities: &StoreCapabilities,
    definition: &Definition,
) -> Result<CacheValue> {
    if definition.simple_data || capabilities.dereferences_objects || value.is_scalar() {
        return Ok(value);
    }
    if depth(&value) > MAX_PLAIN_DEPTH || !is_plain(&value) {
        serialized_copy(&value)
    } else {
        Ok(structural_copy(&value))
    }
}

fn depth(value: &CacheValue) -> usize {
    match value {
        CacheValue::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        CacheValue::Map(entries) => 1 + entries.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Plain graphs contain only scalars, arrays and maps; byte payloads and
/// cached-object markers are opaque nodes.
fn is_plain(value: &CacheValue) -> bool {
    match value {
        CacheValue::Bool(_) | CacheValue::Int(_) | CacheValue::Float(_) | CacheValue::Str(_) => {
            true
        }
        CacheValue::Bytes(_) | CacheValue::CachedObject(_) => false,
        CacheValue::Array(items) => items.iter().all(is_plain),
        CacheValue::Map(entries) => entries.values().all(is_plain),
    }
}

fn structural_copy(value: &CacheValue) -> CacheValue {
    match value {
        CacheValue::Array(items) => CacheValue::Array(items.iter().map(structural_copy).collect()),
        CacheValue::Map(entries) => CacheValue::Map(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), structural_copy(value)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

fn serialized_copy(value: &CacheValue) -> Result<CacheValue> {
    let bytes = bincode::serialize(value)
        .map_err(|e| CacheError::Serialization(format!("reference-breaking encode: {}", e)))?;
    bincode::deserialize(&bytes)
        .map_err(|e| CacheError::Serialization(format!("reference-breaking decode: {}", e)))
}
