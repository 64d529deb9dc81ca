//! Per-kind entity caches backed by a domain data provider.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use knk_core::error::Result;
use knk_core::traits::DomainDataProvider;
use knk_core::types::{District, DomainId, DomainRecord, DomainType, Street, Structure, Town};

use crate::config::CacheConfig;
use crate::expiring::{Cached, ExpiringCache};
use crate::metrics::CacheMetrics;

/// Entity cache for one domain kind, keyed by identifier.
///
/// Misses are loaded through the provider with the single-flight behavior of
/// [`ExpiringCache`].
pub struct DomainCache<E: DomainRecord> {
    entries: ExpiringCache<DomainId, Arc<E>>,
    provider: Arc<dyn DomainDataProvider>,
    default_timeout: Option<Duration>,
}

/// Town cache.
pub type TownCache = DomainCache<Town>;
/// District cache.
pub type DistrictCache = DomainCache<District>;
/// Street cache.
pub type StreetCache = DomainCache<Street>;
/// Structure cache.
pub type StructureCache = DomainCache<Structure>;

impl<E: DomainRecord> DomainCache<E> {
    /// Creates an empty cache loading through `provider`.
    pub fn new(provider: Arc<dyn DomainDataProvider>, config: &CacheConfig) -> Self {
        Self {
            entries: ExpiringCache::named(E::DOMAIN_TYPE.as_str(), config.ttl()),
            provider,
            default_timeout: config.timeout(),
        }
    }

    /// The kind of entity held here.
    pub fn domain_type(&self) -> DomainType {
        E::DOMAIN_TYPE
    }

    /// Returns the entity, loading it on a miss with the configured timeout.
    #[instrument(skip(self), fields(kind = %E::DOMAIN_TYPE))]
    pub async fn get(&self, id: DomainId) -> Result<Arc<E>> {
        self.get_with_timeout(id, self.default_timeout).await
    }

    /// Returns the entity, waiting at most `timeout` for a load.
    pub async fn get_with_timeout(&self, id: DomainId, timeout: Option<Duration>) -> Result<Arc<E>> {
        let provider = Arc::clone(&self.provider);
        self.entries
            .get_with_timeout(id, timeout.or(self.default_timeout), move |id| async move {
                E::fetch(provider.as_ref(), id).await.map(Arc::new)
            })
            .await
    }

    /// Returns the entity, serving an expired copy if the provider is
    /// temporarily unavailable.
    pub async fn get_or_stale(&self, id: DomainId, timeout: Option<Duration>) -> Result<Cached<Arc<E>>> {
        let provider = Arc::clone(&self.provider);
        self.entries
            .get_or_stale(id, timeout.or(self.default_timeout), move |id| async move {
                E::fetch(provider.as_ref(), id).await.map(Arc::new)
            })
            .await
    }

    /// Reads without loading.
    pub fn peek(&self, id: DomainId) -> Option<Cached<Arc<E>>> {
        self.entries.peek(&id)
    }

    /// Stores an entity fetched elsewhere.
    pub fn put(&self, entity: E) -> Arc<E> {
        let entity = Arc::new(entity);
        self.entries.put(entity.id(), Arc::clone(&entity));
        entity
    }

    /// Stores many entities at once.
    pub fn put_all<I>(&self, entities: I)
    where
        I: IntoIterator<Item = E>,
    {
        self.entries
            .put_all(entities.into_iter().map(|e| (e.id(), Arc::new(e))));
    }

    /// Drops one entity so the next read reloads it.
    pub fn invalidate(&self, id: DomainId) -> bool {
        let removed = self.entries.invalidate(&id);
        if removed {
            debug!(kind = %E::DOMAIN_TYPE, id, "Invalidated entry");
        }
        removed
    }

    /// Drops every entity. Metrics are kept.
    pub fn clear(&self) {
        let count = self.entries.size();
        self.entries.clear();
        info!(kind = %E::DOMAIN_TYPE, count, "Cleared cache");
    }

    /// Number of stored entities, expired ones included.
    pub fn size(&self) -> usize {
        self.entries.size()
    }

    /// This cache's counters.
    pub fn metrics(&self) -> &CacheMetrics {
        self.entries.metrics()
    }

    /// The TTL applied to every entity.
    pub fn ttl(&self) -> Duration {
        self.entries.ttl()
    }
}

/// One cache per domain kind, sharing a provider and a TTL.
#[derive(Clone)]
pub struct DomainCaches {
    /// Towns by id
    pub towns: Arc<TownCache>,
    /// Districts by id
    pub districts: Arc<DistrictCache>,
    /// Streets by id
    pub streets: Arc<StreetCache>,
    /// Structures by id
    pub structures: Arc<StructureCache>,
}

impl DomainCaches {
    /// Creates all four caches.
    pub fn new(provider: Arc<dyn DomainDataProvider>, config: &CacheConfig) -> Self {
        Self {
            towns: Arc::new(DomainCache::new(Arc::clone(&provider), config)),
            districts: Arc::new(DomainCache::new(Arc::clone(&provider), config)),
            streets: Arc::new(DomainCache::new(Arc::clone(&provider), config)),
            structures: Arc::new(DomainCache::new(provider, config)),
        }
    }

    /// Display label, size and metrics of every cache, towns first.
    pub fn report(&self) -> [(&'static str, usize, &CacheMetrics); 4] {
        [
            ("Towns", self.towns.size(), self.towns.metrics()),
            ("Districts", self.districts.size(), self.districts.metrics()),
            ("Streets", self.streets.size(), self.streets.metrics()),
            ("Structures", self.structures.size(), self.structures.metrics()),
        ]
    }

    /// Drops every entity in every cache.
    pub fn clear_all(&self) {
        self.towns.clear();
        self.districts.clear();
        self.streets.clear();
        self.structures.clear();
    }

    /// Zeroes every cache's counters.
    pub fn reset_metrics(&self) {
        self.towns.metrics().reset();
        self.districts.metrics().reset();
        self.streets.metrics().reset();
        self.structures.metrics().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knk_core::error::KnkError;
    use knk_core::types::DomainRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        town_calls: AtomicUsize,
    }

    #[async_trait]
    impl DomainDataProvider for CountingProvider {
        async fn fetch_town(&self, id: DomainId) -> Result<Town> {
            self.town_calls.fetch_add(1, Ordering::SeqCst);
            if id == 404 {
                return Err(KnkError::NotFound {
                    domain_type: DomainType::Town,
                    id,
                });
            }
            Ok(Town {
                id,
                name: format!("Town {}", id),
                description: None,
                region_id: Some(format!("region-town-{}", id)),
                allow_entry: true,
                allow_exit: true,
            })
        }

        async fn fetch_district(&self, id: DomainId) -> Result<District> {
            Err(KnkError::NotFound {
                domain_type: DomainType::District,
                id,
            })
        }

        async fn fetch_street(&self, id: DomainId) -> Result<Street> {
            Err(KnkError::NotFound {
                domain_type: DomainType::Street,
                id,
            })
        }

        async fn fetch_structure(&self, id: DomainId) -> Result<Structure> {
            Err(KnkError::NotFound {
                domain_type: DomainType::Structure,
                id,
            })
        }

        async fn resolve_region(&self, _region_id: &str) -> Result<Option<DomainRef>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_loads_through_provider_once() {
        let provider = Arc::new(CountingProvider::default());
        let cache = TownCache::new(provider.clone(), &CacheConfig::default());

        let first = cache.get(1).await.unwrap();
        let second = cache.get(1).await.unwrap();

        assert_eq!(first.name, "Town 1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.town_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.domain_type(), DomainType::Town);
    }

    #[tokio::test]
    async fn test_not_found_propagates() {
        let provider = Arc::new(CountingProvider::default());
        let cache = TownCache::new(provider, &CacheConfig::default());

        let err = cache.get(404).await.unwrap_err();
        assert!(err.is_data_error());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_put_skips_provider() {
        let provider = Arc::new(CountingProvider::default());
        let cache = TownCache::new(provider.clone(), &CacheConfig::default());

        cache.put(Town {
            id: 9,
            name: "Preloaded".into(),
            description: None,
            region_id: None,
            allow_entry: false,
            allow_exit: true,
        });

        assert_eq!(cache.get(9).await.unwrap().name, "Preloaded");
        assert_eq!(provider.town_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_caches_clear_and_reset() {
        let provider = Arc::new(CountingProvider::default());
        let caches = DomainCaches::new(provider, &CacheConfig::default());

        caches.towns.get(1).await.unwrap();
        caches.towns.get(2).await.unwrap();
        caches.clear_all();

        let report = caches.report();
        assert_eq!(report[0].0, "Towns");
        assert_eq!(report[0].1, 0);
        assert_eq!(report[0].2.evictions(), 2);

        caches.reset_metrics();
        assert_eq!(caches.towns.metrics().evictions(), 0);
    }
}
