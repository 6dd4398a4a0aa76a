//! Cache definitions
//!
//! A definition is the immutable per-cache configuration the factory hands a
//! loader: which component/area the cache belongs to, its TTL, whether the
//! static-acceleration tier runs and how large it may grow, which events
//! invalidate it, and whether writes require locking. Identifiers are the
//! one runtime-replaceable part; replacing them changes every parsed key, so
//! the loader empties its acceleration tier when they change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    /// Owning component, e.g. `"core"`
    pub component: String,
    /// Cache area within the component, e.g. `"eventinvalidation"`
    pub area: String,
    /// Time-to-live in seconds; `0` means entries never expire
    pub ttl: u64,
    /// Caller asserts stored values share no references and skips
    /// reference breaking
    pub simple_data: bool,
    /// Whether the loader runs a static-acceleration tier
    pub static_acceleration: bool,
    /// Acceleration bound; `None` is unbounded
    pub static_acceleration_size: Option<usize>,
    /// Events whose invalidation records this cache subscribes to
    pub invalidation_events: Vec<String>,
    /// Writes must happen under a per-key lock
    pub require_locking: bool,
    identifiers: BTreeMap<String, String>,
}

impl Definition {
    /// Create a definition with defaults: no TTL, no acceleration, no
    /// locking, no subscribed events.
    pub fn new(component: &str, area: &str) -> Self {
        Self {
            component: component.to_string(),
            area: area.to_string(),
            ttl: 0,
            simple_data: false,
            static_acceleration: false,
            static_acceleration_size: None,
            invalidation_events: Vec::new(),
            require_locking: false,
            identifiers: BTreeMap::new(),
        }
    }

    /// Set the TTL in seconds.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mark the cached data as simple (no shared references).
    pub fn with_simple_data(mut self) -> Self {
        self.simple_data = true;
        self
    }

    /// Enable the static-acceleration tier with an optional bound.
    pub fn with_static_acceleration(mut self, size: Option<usize>) -> Self {
        self.static_acceleration = true;
        self.static_acceleration_size = size;
        self
    }

    /// Subscribe the cache to invalidation events.
    pub fn with_invalidation_events(mut self, events: Vec<String>) -> Self {
        self.invalidation_events = events;
        self
    }

    /// Require per-key locking around writes.
    pub fn with_require_locking(mut self) -> Self {
        self.require_locking = true;
        self
    }

    /// Set the initial identifiers.
    pub fn with_identifiers(mut self, identifiers: BTreeMap<String, String>) -> Self {
        self.identifiers = identifiers;
        self
    }

    /// The `component/area` identity string.
    pub fn id(&self) -> String {
        format!("{}/{}", self.component, self.area)
    }

    /// Current identifiers.
    pub fn identifiers(&self) -> &BTreeMap<String, String> {
        &self.identifiers
    }

    /// Replace the identifiers, reporting whether anything changed.
    pub fn set_identifiers(&mut self, identifiers: BTreeMap<String, String>) -> bool {
        if self.identifiers == identifiers {
            return false;
        }
        self.identifiers = identifiers;
        true
    }

    /// Deterministic hash of the definition identity and identifiers.
    ///
    /// Equal definitions hash equally in every process, so parsed keys stay
    /// stable across requests and machines.
    pub fn hash(&self) -> String {
        let mut input = self.id();
        for (name, value) in &self.identifiers {
            input.push('/');
            input.push_str(name);
            input.push('=');
            input.push_str(value);
        }
        format!("{:x}", md5::compute(input))
    }

    /// The ordered key parts a multi-identifier store receives:
    /// component, area, then each identifier pair.
    pub fn multi_key_parts(&self) -> BTreeMap<String, String> {
        let mut parts = BTreeMap::new();
        parts.insert("component".to_string(), self.component.clone());
        parts.insert("area".to_string(), self.area.clone());
        for (name, value) in &self.identifiers {
            parts.insert(name.clone(), value.clone());
        }
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifiers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_builder_defaults() {
        let def = Definition::new("core", "strings");
        assert_eq!(def.ttl, 0);
        assert!(!def.static_acceleration);
        assert!(!def.require_locking);
        assert_eq!(def.id(), "core/strings");
    }

    #[test]
    fn test_set_identifiers_reports_change() {
        let mut def = Definition::new("core", "strings")
            .with_identifiers(identifiers(&[("lang", "en")]));

        assert!(!def.set_identifiers(identifiers(&[("lang", "en")])));
        assert!(def.set_identifiers(identifiers(&[("lang", "de")])));
        assert_eq!(def.identifiers().get("lang").unwrap(), "de");
    }

    #[test]
    fn test_hash_deterministic_and_identifier_sensitive() {
        let a = Definition::new("core", "strings").with_identifiers(identifiers(&[("lang", "en")]));
        let b = Definition::new("core", "strings").with_identifiers(identifiers(&[("lang", "en")]));
        let c = Definition::new("core", "strings").with_identifiers(identifiers(&[("lang", "de")]));

        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_multi_key_parts() {
        let def = Definition::new("mod_quiz", "attempts")
            .with_identifiers(identifiers(&[("quiz", "7")]));
        let parts = def.multi_key_parts();
        assert_eq!(parts.get("component").unwrap(), "mod_quiz");
        assert_eq!(parts.get("area").unwrap(), "attempts");
        assert_eq!(parts.get("quiz").unwrap(), "7");
    }
}
