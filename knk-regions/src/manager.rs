//! Lifecycle and aggregate reporting for every cache.

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{info, instrument};

use knk_cache::{CacheConfig, CacheMetrics, DistrictCache, DomainCaches, StreetCache, StructureCache, TownCache};
use knk_core::error::{KnkError, Result};
use knk_core::traits::DomainDataProvider;

use crate::resolver::{RegionDomainResolver, ResolverConfig};

/// Owns the domain caches and reports on them.
///
/// The manager never resolves anything itself. A resolver may be attached
/// once, after wiring, so its region cache shows up in reports and is
/// included in `clear_all` and `reset_metrics`.
pub struct CacheManager {
    caches: DomainCaches,
    config: CacheConfig,
    resolver: OnceLock<Arc<RegionDomainResolver>>,
}

impl CacheManager {
    /// Creates every domain cache with the configured TTL.
    pub fn new(provider: Arc<dyn DomainDataProvider>, config: &CacheConfig) -> Self {
        let caches = DomainCaches::new(provider, config);
        info!(ttl = %format_duration(config.ttl()), "Cache manager initialized");
        Self {
            caches,
            config: config.clone(),
            resolver: OnceLock::new(),
        }
    }

    /// Town cache.
    pub fn towns(&self) -> &Arc<TownCache> {
        &self.caches.towns
    }

    /// District cache.
    pub fn districts(&self) -> &Arc<DistrictCache> {
        &self.caches.districts
    }

    /// Street cache.
    pub fn streets(&self) -> &Arc<StreetCache> {
        &self.caches.streets
    }

    /// Structure cache.
    pub fn structures(&self) -> &Arc<StructureCache> {
        &self.caches.structures
    }

    /// All domain caches.
    pub fn caches(&self) -> &DomainCaches {
        &self.caches
    }

    /// TTL shared by every cache.
    pub fn ttl(&self) -> Duration {
        self.config.ttl()
    }

    /// Attaches the resolver whose region cache should be reported.
    ///
    /// Fails if a resolver is already attached.
    pub fn set_region_resolver(&self, resolver: Arc<RegionDomainResolver>) -> Result<()> {
        self.resolver
            .set(resolver)
            .map_err(|_| KnkError::ConfigError("region resolver is already attached".into()))
    }

    /// Builds a resolver over this manager's caches and attaches it.
    pub fn build_resolver(
        &self,
        provider: Arc<dyn DomainDataProvider>,
        config: ResolverConfig,
    ) -> Result<Arc<RegionDomainResolver>> {
        let resolver = Arc::new(RegionDomainResolver::new(
            provider,
            self.caches.clone(),
            &self.config,
            config,
        ));
        self.set_region_resolver(Arc::clone(&resolver))?;
        Ok(resolver)
    }

    /// The attached resolver, if any.
    pub fn region_resolver(&self) -> Option<&Arc<RegionDomainResolver>> {
        self.resolver.get()
    }

    fn rows(&self) -> Vec<(&'static str, usize, &CacheMetrics)> {
        let mut rows = self.caches.report().to_vec();
        if let Some(resolver) = self.resolver.get() {
            rows.push(("Domains", resolver.region_cache_size(), resolver.region_cache_metrics()));
        }
        rows
    }

    /// Emits one `info` event per cache with its size and counters.
    pub fn log_metrics(&self) {
        for (cache, size, metrics) in self.rows() {
            let snap = metrics.snapshot();
            info!(
                cache,
                size,
                hits = snap.hits,
                misses = snap.misses,
                stale_hits = snap.stale_hits,
                evictions = snap.evictions,
                hit_rate = snap.hit_rate_percent(),
                "Cache metrics"
            );
        }
    }

    /// Drops every entry in every cache. Metrics are kept.
    #[instrument(skip(self))]
    pub fn clear_all(&self) {
        self.caches.clear_all();
        if let Some(resolver) = self.resolver.get() {
            resolver.clear_region_cache();
        }
        info!("All caches cleared");
    }

    /// Zeroes every counter. Entries are kept.
    #[instrument(skip(self))]
    pub fn reset_metrics(&self) {
        self.caches.reset_metrics();
        if let Some(resolver) = self.resolver.get() {
            resolver.region_cache_metrics().reset();
        }
        info!("Cache metrics reset");
    }

    /// Multi-line report of entries and hit rate per cache, then the TTL.
    ///
    /// ```text
    /// Cache Health:
    ///   Towns: 3 entries, 75% hit rate
    ///   Districts: 5 entries, 60% hit rate
    ///   Streets: 0 entries, 0% hit rate
    ///   Structures: 2 entries, 50% hit rate
    ///   Domains: 4 entries, 80% hit rate
    ///   TTL: 1m 0s
    /// ```
    pub fn health_summary(&self) -> String {
        let mut out = String::from("Cache Health:\n");
        for (label, size, metrics) in self.rows() {
            let _ = writeln!(
                out,
                "  {}: {} entries, {}% hit rate",
                label,
                size,
                metrics.snapshot().hit_rate_percent()
            );
        }
        let _ = write!(out, "  TTL: {}", format_duration(self.ttl()));
        out
    }
}

/// Formats as `"Xm Ys"`, or `"Ys"` under a minute.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let (minutes, rest) = (seconds / 60, seconds % 60);
    if minutes > 0 {
        format!("{}m {}s", minutes, rest)
    } else {
        format!("{}s", rest)
    }
}
