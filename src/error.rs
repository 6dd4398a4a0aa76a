//! Error types for the caching facade
//!
//! All fallible operations in the crate return [`Result`]. Error variants
//! follow the three contract categories the facade distinguishes between:
//! coding errors (caller misuse), store faults (the backing engine failed),
//! and integrity faults (an entry with an unexpected envelope shape).

use thiserror::Error;

/// Cache error types
#[derive(Error, Debug)]
pub enum CacheError {
    /// Caller-visible coding error: versioned/unversioned misuse, a missing
    /// value under `MustExist`, a non-versionable data source asked for a
    /// versioned read, or an outdated version returned by a data source
    #[error("Coding error: {0}")]
    Contract(String),

    /// The underlying store failed
    #[error("Store error: {0}")]
    Store(String),

    /// A retrieved entry had an unexpected envelope shape
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Write-lock acquisition or release failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// True for errors the read path swallows as a miss (store faults);
    /// contract and integrity errors always propagate.
    pub fn is_store_fault(&self) -> bool {
        matches!(self, CacheError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_fault_classification() {
        assert!(CacheError::Store("down".to_string()).is_store_fault());
        assert!(!CacheError::Contract("misuse".to_string()).is_store_fault());
        assert!(!CacheError::Integrity("shape".to_string()).is_store_fault());
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::Contract("versioned get on unversioned cache".to_string());
        assert_eq!(
            err.to_string(),
            "Coding error: versioned get on unversioned cache"
        );
    }
}
