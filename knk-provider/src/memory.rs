//! In-memory domain data provider.
//!
//! Thread-safe tables suitable for development and tests. Availability,
//! per-key failures and latency can be controlled at runtime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use tracing::{debug, instrument};

use knk_core::error::{KnkError, Result};
use knk_core::traits::DomainDataProvider;
use knk_core::types::{
    District, DomainId, DomainRecord, DomainRef, DomainType, Street, Structure, Town,
};

use crate::dataset::DomainDataset;

/// Number of provider calls per method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `fetch_town` calls
    pub towns: u64,
    /// `fetch_district` calls
    pub districts: u64,
    /// `fetch_street` calls
    pub streets: u64,
    /// `fetch_structure` calls
    pub structures: u64,
    /// `resolve_region` calls
    pub regions: u64,
}

impl CallCounts {
    /// Entity fetches across all kinds, region lookups excluded.
    pub fn fetches(&self) -> u64 {
        self.towns + self.districts + self.streets + self.structures
    }
}

#[derive(Debug, Default)]
struct Counters {
    towns: AtomicU64,
    districts: AtomicU64,
    streets: AtomicU64,
    structures: AtomicU64,
    regions: AtomicU64,
}

/// In-memory domain data provider.
///
/// # Indexing
///
/// Records are stored per kind by id. Inserting a record that carries a
/// `region_id` also maps that region to the record; [`map_region`] adds
/// mappings for regions the records do not name.
///
/// # Failure Injection
///
/// - [`set_unavailable`]: every call fails with `ProviderUnavailable`
/// - [`fail_on`] / [`fail_region`]: only the chosen keys fail
/// - [`set_latency`]: every call sleeps first (tokio time, so paused-clock
///   tests stay deterministic)
///
/// [`map_region`]: Self::map_region
/// [`set_unavailable`]: Self::set_unavailable
/// [`fail_on`]: Self::fail_on
/// [`fail_region`]: Self::fail_region
/// [`set_latency`]: Self::set_latency
#[derive(Debug, Default)]
pub struct MemoryProvider {
    towns: DashMap<DomainId, Town>,
    districts: DashMap<DomainId, District>,
    streets: DashMap<DomainId, Street>,
    structures: DashMap<DomainId, Structure>,
    /// Region id → entity
    regions: DashMap<String, DomainRef>,
    unavailable: AtomicBool,
    failing: DashSet<DomainRef>,
    failing_regions: DashSet<String>,
    latency: RwLock<Option<Duration>>,
    calls: Counters,
}

impl MemoryProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider holding every record and mapping of `dataset`.
    pub fn from_dataset(dataset: &DomainDataset) -> Self {
        let provider = Self::new();
        for town in &dataset.towns {
            provider.insert_town(town.clone());
        }
        for district in &dataset.districts {
            provider.insert_district(district.clone());
        }
        for street in &dataset.streets {
            provider.insert_street(street.clone());
        }
        for structure in &dataset.structures {
            provider.insert_structure(structure.clone());
        }
        for (region_id, domain) in &dataset.regions {
            provider.map_region(region_id.clone(), *domain);
        }
        provider
    }

    /// Snapshots every record and every region mapping.
    pub fn to_dataset(&self) -> DomainDataset {
        fn sorted<T: Clone + DomainRecord>(table: &DashMap<DomainId, T>) -> Vec<T> {
            let mut records: Vec<T> = table.iter().map(|e| e.value().clone()).collect();
            records.sort_by_key(|r| r.id());
            records
        }

        DomainDataset {
            towns: sorted(&self.towns),
            districts: sorted(&self.districts),
            streets: sorted(&self.streets),
            structures: sorted(&self.structures),
            regions: self
                .regions
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    // ─── Records ────────────────────────────────────────────────────────────

    fn index_region(&self, record: &impl DomainRecord) {
        if let Some(region_id) = record.region_id() {
            self.regions.insert(region_id.to_string(), record.domain_ref());
        }
    }

    /// Stores a town, replacing any with the same id.
    pub fn insert_town(&self, town: Town) {
        self.index_region(&town);
        self.towns.insert(town.id, town);
    }

    /// Stores a district.
    pub fn insert_district(&self, district: District) {
        self.index_region(&district);
        self.districts.insert(district.id, district);
    }

    /// Stores a street.
    pub fn insert_street(&self, street: Street) {
        self.index_region(&street);
        self.streets.insert(street.id, street);
    }

    /// Stores a structure.
    pub fn insert_structure(&self, structure: Structure) {
        self.index_region(&structure);
        self.structures.insert(structure.id, structure);
    }

    /// Builder form of [`insert_town`](Self::insert_town).
    pub fn with_town(self, town: Town) -> Self {
        self.insert_town(town);
        self
    }

    /// Builder form of [`insert_district`](Self::insert_district).
    pub fn with_district(self, district: District) -> Self {
        self.insert_district(district);
        self
    }

    /// Builder form of [`insert_street`](Self::insert_street).
    pub fn with_street(self, street: Street) -> Self {
        self.insert_street(street);
        self
    }

    /// Builder form of [`insert_structure`](Self::insert_structure).
    pub fn with_structure(self, structure: Structure) -> Self {
        self.insert_structure(structure);
        self
    }

    /// Removes a record. Region mappings pointing at it are kept, so lookups
    /// through them report `NotFound`.
    pub fn remove(&self, domain: DomainRef) -> bool {
        match domain.domain_type {
            DomainType::Town => self.towns.remove(&domain.id).is_some(),
            DomainType::District => self.districts.remove(&domain.id).is_some(),
            DomainType::Street => self.streets.remove(&domain.id).is_some(),
            DomainType::Structure => self.structures.remove(&domain.id).is_some(),
        }
    }

    /// Maps a region to an entity, replacing any earlier mapping.
    pub fn map_region(&self, region_id: impl Into<String>, domain: DomainRef) {
        self.regions.insert(region_id.into(), domain);
    }

    /// Removes a region mapping.
    pub fn unmap_region(&self, region_id: &str) -> bool {
        self.regions.remove(region_id).is_some()
    }

    /// Number of records across all kinds.
    pub fn record_count(&self) -> usize {
        self.towns.len() + self.districts.len() + self.streets.len() + self.structures.len()
    }

    /// Number of region mappings.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    // ─── Failure injection ──────────────────────────────────────────────────

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes fetches of one entity fail with `ProviderUnavailable`.
    pub fn fail_on(&self, domain: DomainRef) {
        self.failing.insert(domain);
    }

    /// Makes lookups of one region fail with `ProviderUnavailable`.
    pub fn fail_region(&self, region_id: impl Into<String>) {
        self.failing_regions.insert(region_id.into());
    }

    /// Lifts every injected failure, including unavailability.
    pub fn clear_failures(&self) {
        self.failing.clear();
        self.failing_regions.clear();
        self.set_unavailable(false);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Calls received so far.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            towns: self.calls.towns.load(Ordering::Relaxed),
            districts: self.calls.districts.load(Ordering::Relaxed),
            streets: self.calls.streets.load(Ordering::Relaxed),
            structures: self.calls.structures.load(Ordering::Relaxed),
            regions: self.calls.regions.load(Ordering::Relaxed),
        }
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    async fn simulate(&self) -> Result<()> {
        let latency = *self.latency.read();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KnkError::ProviderUnavailable(
                "domain data provider is unavailable".into(),
            ));
        }
        Ok(())
    }

    async fn fetch<T: DomainRecord>(
        &self,
        table: &DashMap<DomainId, T>,
        counter: &AtomicU64,
        id: DomainId,
    ) -> Result<T> {
        counter.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;

        let domain = DomainRef::new(T::DOMAIN_TYPE, id);
        if self.failing.contains(&domain) {
            return Err(KnkError::ProviderUnavailable(format!("fetch of {} failed", domain)));
        }

        let record = table.get(&id).map(|e| e.value().clone());
        debug!(%domain, found = record.is_some(), "Fetched record");
        record.ok_or(KnkError::NotFound {
            domain_type: T::DOMAIN_TYPE,
            id,
        })
    }
}

#[async_trait]
impl DomainDataProvider for MemoryProvider {
    #[instrument(skip(self))]
    async fn fetch_town(&self, id: DomainId) -> Result<Town> {
        self.fetch(&self.towns, &self.calls.towns, id).await
    }

    #[instrument(skip(self))]
    async fn fetch_district(&self, id: DomainId) -> Result<District> {
        self.fetch(&self.districts, &self.calls.districts, id).await
    }

    #[instrument(skip(self))]
    async fn fetch_street(&self, id: DomainId) -> Result<Street> {
        self.fetch(&self.streets, &self.calls.streets, id).await
    }

    #[instrument(skip(self))]
    async fn fetch_structure(&self, id: DomainId) -> Result<Structure> {
        self.fetch(&self.structures, &self.calls.structures, id).await
    }

    #[instrument(skip(self))]
    async fn resolve_region(&self, region_id: &str) -> Result<Option<DomainRef>> {
        self.calls.regions.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;

        if self.failing_regions.contains(region_id) {
            return Err(KnkError::ProviderUnavailable(format!(
                "lookup of region '{}' failed",
                region_id
            )));
        }
        Ok(self.regions.get(region_id).map(|e| *e.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn town(id: DomainId, region: &str) -> Town {
        Town {
            id,
            name: format!("Town {}", id),
            description: None,
            region_id: Some(region.to_string()),
            allow_entry: true,
            allow_exit: true,
        }
    }

    fn district(id: DomainId, town_id: DomainId) -> District {
        District {
            id,
            name: format!("District {}", id),
            description: None,
            region_id: None,
            allow_entry: true,
            allow_exit: true,
            town_id,
        }
    }

    #[tokio::test]
    async fn test_fetch_and_count() {
        let provider = MemoryProvider::new().with_town(town(1, "region-town-1"));

        assert_eq!(provider.fetch_town(1).await.unwrap().name, "Town 1");
        let err = provider.fetch_town(2).await.unwrap_err();
        assert_eq!(
            err,
            KnkError::NotFound {
                domain_type: DomainType::Town,
                id: 2
            }
        );
        assert_eq!(provider.calls().towns, 2);
        assert_eq!(provider.calls().fetches(), 2);
    }

    #[tokio::test]
    async fn test_region_index_from_records() {
        let provider = MemoryProvider::new()
            .with_town(town(1, "region-town-1"))
            .with_district(district(5, 1));
        provider.map_region("region-district-5", DomainRef::district(5));

        assert_eq!(
            provider.resolve_region("region-town-1").await.unwrap(),
            Some(DomainRef::town(1))
        );
        assert_eq!(
            provider.resolve_region("region-district-5").await.unwrap(),
            Some(DomainRef::district(5))
        );
        assert_eq!(provider.resolve_region("wilderness").await.unwrap(), None);
        assert_eq!(provider.region_count(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_and_injected_failures() {
        let provider = MemoryProvider::new()
            .with_town(town(1, "r1"))
            .with_town(town(2, "r2"));

        provider.fail_on(DomainRef::town(1));
        assert!(provider.fetch_town(1).await.unwrap_err().is_recoverable());
        assert!(provider.fetch_town(2).await.is_ok());

        provider.fail_region("r2");
        assert!(provider.resolve_region("r2").await.is_err());
        assert!(provider.resolve_region("r1").await.is_ok());

        provider.set_unavailable(true);
        assert!(matches!(
            provider.fetch_town(2).await,
            Err(KnkError::ProviderUnavailable(_))
        ));

        provider.clear_failures();
        assert!(provider.fetch_town(1).await.is_ok());
        assert!(provider.resolve_region("r2").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_tokio_time() {
        let provider = MemoryProvider::new().with_town(town(1, "r1"));
        provider.set_latency(Some(Duration::from_secs(5)));

        let started = tokio::time::Instant::now();
        provider.fetch_town(1).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_dataset_round_trip_preserves_mappings() {
        let provider = MemoryProvider::new()
            .with_town(town(2, "r2"))
            .with_town(town(1, "r1"))
            .with_district(district(5, 1));
        provider.map_region("harbor", DomainRef::district(5));

        let dataset = provider.to_dataset();
        assert_eq!(dataset.towns.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(dataset.regions.len(), 3);

        let restored = MemoryProvider::from_dataset(&dataset);
        assert_eq!(restored.record_count(), 3);
        assert_eq!(restored.region_count(), 3);
    }

    #[test]
    fn test_remove_keeps_mapping() {
        let provider = MemoryProvider::new().with_town(town(1, "r1"));
        assert!(provider.remove(DomainRef::town(1)));
        assert!(!provider.remove(DomainRef::town(1)));
        assert_eq!(provider.region_count(), 1);
    }
}
