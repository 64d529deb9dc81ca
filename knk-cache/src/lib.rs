//! # Knights & Kings Cache
//!
//! Bounded-freshness caches for domain entities.
//!
//! - [`ExpiringCache`]: generic key → value store with a fixed TTL,
//!   hit/miss/eviction metrics and single-flight load coalescing
//! - [`DomainCache`]: one expiring cache per entity kind, loading through a
//!   [`DomainDataProvider`](knk_core::DomainDataProvider) on miss
//! - [`CacheConfig`]: the single TTL shared by every domain cache
//!
//! ## Example
//!
//! ```rust,ignore
//! use knk_cache::ExpiringCache;
//! use std::time::Duration;
//!
//! let cache: ExpiringCache<String, u32> = ExpiringCache::new(Duration::from_secs(60));
//! let value = cache.get("town-1".to_string(), |_| async { Ok(42) }).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod config;
mod domain;
mod expiring;
mod metrics;

pub use config::CacheConfig;
pub use domain::{DistrictCache, DomainCache, DomainCaches, StreetCache, StructureCache, TownCache};
pub use expiring::{Cached, ExpiringCache};
pub use metrics::{CacheMetrics, MetricsSnapshot};
