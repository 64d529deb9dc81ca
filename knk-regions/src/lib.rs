//! # Knights & Kings Regions
//!
//! Turns external region identifiers into ordered domain hierarchies with
//! inherited access decisions, and manages the caches behind them.
//!
//! ## Components
//!
//! - [`RegionDomainResolver`]: maps regions to entities, walks every entity
//!   up to its town and applies deny-wins over the chain
//! - [`CacheManager`]: owns the domain caches; metrics, health and clearing
//! - [`RegionTransitionService`]: entry/exit decisions for a player move
//!
//! ## Example
//!
//! ```rust,ignore
//! use knk_regions::{CacheManager, ResolverConfig};
//!
//! let manager = CacheManager::new(provider.clone(), &CacheConfig::default());
//! let resolver = manager.build_resolver(provider, ResolverConfig::default())?;
//!
//! let query = DomainRegionQuery::new(["region-district-5"], true);
//! let resolution = resolver.resolve(&query, &RequestContext::new()).await;
//! println!("{}", manager.health_summary());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod hierarchy;
mod manager;
mod resolver;
mod transition;

pub use manager::{format_duration, CacheManager};
pub use resolver::{RegionDomainResolver, ResolverConfig};
pub use transition::{RegionTransitionService, TransitionDecision, TransitionKind};
