//! Common traits for Knights & Kings.
//!
//! The domain data provider is the only external collaborator of the cache
//! and resolver crates. Implementations might use:
//! - In-memory tables (for testing/development)
//! - A JSON snapshot on disk
//! - The Web API over HTTP

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{District, DomainId, DomainRef, Street, Structure, Town};

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN DATA PROVIDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of truth for domain records and region mappings.
///
/// Every method may fail with [`KnkError::ProviderUnavailable`] on transient
/// trouble. A missing record is [`KnkError::NotFound`]; a region with no
/// mapping is `Ok(None)`.
///
/// [`KnkError::ProviderUnavailable`]: crate::KnkError::ProviderUnavailable
/// [`KnkError::NotFound`]: crate::KnkError::NotFound
#[async_trait]
pub trait DomainDataProvider: Send + Sync {
    /// Fetches a town by identifier.
    async fn fetch_town(&self, id: DomainId) -> Result<Town>;

    /// Fetches a district by identifier.
    async fn fetch_district(&self, id: DomainId) -> Result<District>;

    /// Fetches a street by identifier.
    async fn fetch_street(&self, id: DomainId) -> Result<Street>;

    /// Fetches a structure by identifier.
    async fn fetch_structure(&self, id: DomainId) -> Result<Structure>;

    /// Maps an external region identifier to the entity it denotes.
    async fn resolve_region(&self, region_id: &str) -> Result<Option<DomainRef>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-call options threaded through every resolver entry point.
///
/// The timeout bounds how long this caller waits for any single load. A load
/// shared with other callers keeps running after this caller gives up, and
/// dropping the caller's future abandons the wait the same way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Maximum wait per provider-backed load, if any
    pub timeout: Option<Duration>,
}

impl RequestContext {
    /// Context with no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with the given per-load timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// This context's timeout, or `fallback` when unset.
    pub fn timeout_or(&self, fallback: Option<Duration>) -> Option<Duration> {
        self.timeout.or(fallback)
    }
}
