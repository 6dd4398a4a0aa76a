//! # STRATUM - Layered In-Process Caching Facade
//!
//! A layered caching facade that sits in front of one or more backing
//! key-value stores. Loaders form a linear chain: each owns one store and,
//! optionally, either a next loader or a terminal data source. Reads walk
//! down the chain and backfill on the way out; writes propagate through the
//! chain so every tier stays consistent.
//!
//! ## Architecture
//!
//! - `value`: caller keys, dynamic payloads, cacheable-object markers
//! - `envelope`: TTL and version wrappers around stored entries
//! - `definition`: immutable per-cache configuration
//! - `key`: store-suitable key parsing
//! - `store`: the capability-typed store contract and the memory store
//! - `source`: the terminal data-source contract
//! - `loader`: the cache loader chain (read/write/delete/purge)
//! - `lock`: write-lock acquisition and the fallback lock registry
//! - `invalidation`: purge-token based event invalidation
//! - `refsafe`: reference safety for values handed back to callers
//! - `clock`: the process clock and purge-token service
//! - `error`: crate-wide error types

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundational types
pub mod error;
pub mod value;

// Envelopes and configuration
pub mod definition;
pub mod envelope;
pub mod key;

// Storage seams
pub mod source;
pub mod store;

// Process-wide services
pub mod clock;
pub mod lock;

// Invalidation and reference safety
pub mod invalidation;
pub mod refsafe;

// The loader chain
pub mod loader;

// Request-scoped LRU tier backing the loader
mod acceleration;

// Re-export commonly used types
pub use definition::Definition;
pub use envelope::StoredValue;
pub use error::{CacheError, Result};
pub use invalidation::EventChannel;
pub use loader::{CacheLoader, CacheLoaderBuilder, Strictness};
pub use source::{DataSource, StaticSource};
pub use store::{LockState, MemoryStore, MemoryStoreConfig, Store, StoreCapabilities};
pub use value::{CacheKey, CacheValue, Cacheable, CachedObject};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
