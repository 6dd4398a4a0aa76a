//! Key parsing
//!
//! Stores never see caller keys directly. A key-aware, multi-identifier
//! store receives the structured parts the definition generates; every other
//! store receives a deterministic hash of the definition identity and the
//! caller key, so two processes computing the same cache key always address
//! the same slot.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::definition::Definition;
use crate::value::CacheKey;

/// A key in store-suitable form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParsedKey {
    /// Hashed form for single-identifier stores
    Hash(String),
    /// Structured form for stores declaring multi-identifier support
    Parts {
        /// Owning component
        component: String,
        /// Cache area
        area: String,
        /// Definition identifiers
        identifiers: BTreeMap<String, String>,
        /// The caller key in string form
        key: String,
    },
}

impl fmt::Display for ParsedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsedKey::Hash(hash) => write!(f, "{}", hash),
            ParsedKey::Parts {
                component,
                area,
                key,
                ..
            } => write!(f, "{}/{}/{}", component, area, key),
        }
    }
}

/// Parse a caller key for a store.
///
/// `multiple_identifiers` is the owning store's capability flag; it decides
/// between the structured and the hashed form.
pub fn parse(key: &CacheKey, definition: &Definition, multiple_identifiers: bool) -> ParsedKey {
    if multiple_identifiers {
        ParsedKey::Parts {
            component: definition.component.clone(),
            area: definition.area.clone(),
            identifiers: definition.identifiers().clone(),
            key: key.as_store_string(),
        }
    } else {
        let input = format!("{}/{}", definition.hash(), key.as_store_string());
        ParsedKey::Hash(format!("{:x}", md5::compute(input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lang_en() -> BTreeMap<String, String> {
        let mut identifiers = BTreeMap::new();
        identifiers.insert("lang".to_string(), "en".to_string());
        identifiers
    }

    #[test]
    fn test_hash_form_deterministic() {
        let def = Definition::new("core", "strings").with_identifiers(lang_en());
        let key = CacheKey::from("greeting");

        let first = parse(&key, &def, false);
        let second = parse(&key, &def, false);
        assert_eq!(first, second);
    }

    #[test]
    fn test_hash_form_distinguishes_keys_and_definitions() {
        let def = Definition::new("core", "strings");
        let other_def = Definition::new("core", "templates");

        let a = parse(&CacheKey::from("k"), &def, false);
        let b = parse(&CacheKey::from("other"), &def, false);
        let c = parse(&CacheKey::from("k"), &other_def, false);

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_integer_and_string_keys_share_no_slot() {
        let def = Definition::new("core", "strings");
        // "7" and 7 render identically; the parsed keys collapse by design.
        let from_int = parse(&CacheKey::from(7), &def, false);
        let from_str = parse(&CacheKey::from("7"), &def, false);
        assert_eq!(from_int, from_str);
    }

    #[test]
    fn test_parts_form() {
        let def = Definition::new("mod_quiz", "attempts").with_identifiers(lang_en());
        let parsed = parse(&CacheKey::from(12), &def, true);

        match parsed {
            ParsedKey::Parts {
                component,
                area,
                identifiers,
                key,
            } => {
                assert_eq!(component, "mod_quiz");
                assert_eq!(area, "attempts");
                assert_eq!(identifiers.get("lang").unwrap(), "en");
                assert_eq!(key, "12");
            }
            other => panic!("expected parts, got {:?}", other),
        }
    }
}
