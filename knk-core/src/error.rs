//! Error types for Knights & Kings.
//!
//! Every failure is scoped to the smallest unit it concerns: one cache key,
//! one region, or one entity inside a batch. The error type is `Clone` so a
//! single shared load can hand the same failure to every coalesced waiter.

use thiserror::Error;

use crate::types::{DomainRef, DomainType};

/// Result type alias using `KnkError`.
pub type Result<T> = std::result::Result<T, KnkError>;

/// Main error type for all cache and resolution operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KnkError {
    // ═══════════════════════════════════════════════════════════════════════════
    // RESOLUTION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// The region identifier is not mapped to any domain entity.
    #[error("Region '{0}' is not mapped to a domain")]
    Unmapped(String),

    /// The provider has no record for this entity.
    #[error("{domain_type} #{id} not found")]
    NotFound {
        /// Kind of entity requested
        domain_type: DomainType,
        /// Requested identifier
        id: u32,
    },

    /// A cycle or malformed parent reference was found while walking ancestors.
    #[error("Corrupted hierarchy at {domain}: {reason}")]
    CorruptedHierarchy {
        /// The entity whose resolution was aborted
        domain: DomainRef,
        /// What was wrong with its ancestry
        reason: String,
    },

    /// Nothing is cached for this key and loading was not permitted.
    #[error("Not cached: {0}")]
    NotCached(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // PROVIDER ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Transient failure reaching the domain data provider.
    #[error("Domain data provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The caller's wait for a load exceeded its timeout.
    #[error("Load timed out after {millis}ms")]
    Timeout {
        /// The timeout that elapsed
        millis: u64,
    },

    /// The shared load for a key did not complete normally.
    #[error("Coalesced load failed: {0}")]
    LoadCoalescingFailure(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION & I/O ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Invalid query input.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    IoError(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(String),
}

impl KnkError {
    /// Returns true if this error is transient and a later attempt may succeed.
    ///
    /// Recoverable errors are the ones the resolver answers with stale data
    /// when an expired entry is still held.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KnkError::ProviderUnavailable(_)
                | KnkError::Timeout { .. }
                | KnkError::LoadCoalescingFailure(_)
        )
    }

    /// Returns true if this error reflects bad upstream data rather than availability.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            KnkError::NotFound { .. } | KnkError::CorruptedHierarchy { .. }
        )
    }

    /// Convenience constructor for hierarchy corruption.
    pub fn corrupted(domain: DomainRef, reason: impl Into<String>) -> Self {
        KnkError::CorruptedHierarchy {
            domain,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for KnkError {
    fn from(err: std::io::Error) -> Self {
        KnkError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for KnkError {
    fn from(err: serde_json::Error) -> Self {
        KnkError::JsonError(err.to_string())
    }
}
