//! Region identifier → ordered domain hierarchy resolution.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use knk_cache::{CacheConfig, CacheMetrics, Cached, DomainCaches, ExpiringCache};
use knk_core::constants::DEFAULT_MAX_HIERARCHY_DEPTH;
use knk_core::error::{KnkError, Result};
use knk_core::traits::{DomainDataProvider, RequestContext};
use knk_core::types::{
    AccessDecision, DomainEntity, DomainRef, DomainRegionQuery, DomainRegionSummary, DomainType,
    RegionResolution, ResolutionEntry, ResolutionStatus,
};

use crate::hierarchy::{HierarchyArena, NodeState};

/// Configuration for the region resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Default wait per load when the request context sets none
    pub load_timeout: Option<Duration>,
    /// Maximum number of ancestors above any entity
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            load_timeout: None,
            max_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
        }
    }
}

impl ResolverConfig {
    /// Sets the default load timeout.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    /// Sets the maximum ancestor depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Where lookups are answered from.
#[derive(Clone, Copy, Debug)]
enum Source {
    /// Load through the caches, falling back to stale data
    Load(Option<Duration>),
    /// Answer from cached entries only
    CacheOnly,
}

/// Resolves region identifiers into permission-annotated domain hierarchies.
///
/// Region mappings live in a cache of their own with the same TTL as the
/// entity caches. Entities, including every ancestor, are read through the
/// shared [`DomainCaches`], so ancestors get the same freshness and hit-rate
/// accounting as direct lookups.
///
/// # Result Shape
///
/// Every region in the query is named by exactly one entry's `requested_by`,
/// and each ancestor of a mapped entity yields its own entry. Region ids that
/// map to the same entity share that entity's entry. Entries are tagged
/// RESOLVED, STALE, UNMAPPED or FAILED, so one bad identifier never discards
/// the batch.
pub struct RegionDomainResolver {
    provider: Arc<dyn DomainDataProvider>,
    caches: DomainCaches,
    regions: ExpiringCache<String, Option<DomainRef>>,
    config: ResolverConfig,
}

impl RegionDomainResolver {
    /// Creates a resolver reading entities through `caches`.
    pub fn new(
        provider: Arc<dyn DomainDataProvider>,
        caches: DomainCaches,
        cache_config: &CacheConfig,
        config: ResolverConfig,
    ) -> Self {
        Self {
            provider,
            caches,
            regions: ExpiringCache::named("regions", cache_config.ttl()),
            config,
        }
    }

    /// The entity caches this resolver reads through.
    pub fn caches(&self) -> &DomainCaches {
        &self.caches
    }

    /// The resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RESOLUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Resolves every region in `query`, loading whatever is missing.
    #[instrument(skip_all, fields(regions = query.region_ids.len(), top_down = query.top_down_hierarchy))]
    pub async fn resolve(&self, query: &DomainRegionQuery, ctx: &RequestContext) -> RegionResolution {
        let timeout = ctx.timeout_or(self.config.load_timeout);
        let resolution = self.run(query, Source::Load(timeout)).await;
        debug!(
            entries = resolution.len(),
            partial = resolution.is_partial(),
            "Resolved regions"
        );
        resolution
    }

    /// Resolves from cached data only, never calling the provider.
    ///
    /// Anything not cached comes back FAILED with `NotCached`. Expired data is
    /// served as STALE.
    #[instrument(skip_all, fields(regions = query.region_ids.len()))]
    pub async fn resolve_cached(&self, query: &DomainRegionQuery) -> RegionResolution {
        self.run(query, Source::CacheOnly).await
    }

    /// Preloads mappings and full hierarchies for `region_ids`.
    ///
    /// Returns how many of the regions resolved to usable data.
    #[instrument(skip_all)]
    pub async fn warm_cache<I, S>(&self, region_ids: I, ctx: &RequestContext) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let query = DomainRegionQuery::new(region_ids, true);
        let resolution = self.resolve(&query, ctx).await;
        let warmed = resolution
            .entries
            .iter()
            .filter(|e| e.status.is_usable())
            .map(|e| e.requested_by.len())
            .sum();
        info!(requested = query.region_ids.len(), warmed, "Warmed region cache");
        warmed
    }

    /// Overall deny-wins access for a set of regions.
    pub async fn effective_access(&self, query: &DomainRegionQuery, ctx: &RequestContext) -> AccessDecision {
        self.resolve(query, ctx).await.effective_access()
    }

    async fn run(&self, query: &DomainRegionQuery, source: Source) -> RegionResolution {
        // Map every region concurrently
        let mapped = join_all(
            query
                .region_ids
                .iter()
                .map(|region_id| self.lookup_region(region_id, source)),
        )
        .await;

        let mut aliases: BTreeMap<DomainRef, Vec<String>> = BTreeMap::new();
        let mut stale_mappings: HashSet<DomainRef> = HashSet::new();
        let mut region_entries = Vec::new();

        for (region_id, outcome) in query.region_ids.iter().zip(mapped) {
            match outcome {
                Ok(Cached::Fresh(Some(domain))) => {
                    aliases.entry(domain).or_default().push(region_id.clone());
                }
                Ok(Cached::Stale(Some(domain))) => {
                    aliases.entry(domain).or_default().push(region_id.clone());
                    stale_mappings.insert(domain);
                }
                Ok(Cached::Fresh(None)) | Ok(Cached::Stale(None)) => {
                    debug!(region_id = %region_id, "Region is unmapped");
                    region_entries.push(ResolutionEntry::unmapped(region_id));
                }
                Err(err) => {
                    warn!(region_id = %region_id, error = %err, "Region lookup failed");
                    region_entries.push(ResolutionEntry::failed(
                        DomainRegionSummary::unresolved(region_id),
                        err,
                        vec![region_id.clone()],
                    ));
                }
            }
        }

        // Load entities level by level, one lookup per distinct ref
        let arena = self.load_hierarchy(aliases.keys().copied(), source).await;

        // Build summaries and deny-wins decisions
        let mut entries: Vec<ResolutionEntry> = arena
            .nodes()
            .map(|node| {
                let requested_by = aliases.get(&node.domain).cloned().unwrap_or_default();
                let mapping_stale = stale_mappings.contains(&node.domain);
                self.build_entry(&arena, node.domain, requested_by, mapping_stale)
            })
            .collect();

        let key = |e: &ResolutionEntry| e.domain_ref().map(|d| (d.domain_type.rank(), d.id));
        entries.sort_by_key(key);
        if !query.top_down_hierarchy {
            entries.reverse();
        }
        entries.extend(region_entries);

        RegionResolution::new(entries)
    }

    async fn load_hierarchy<I>(&self, roots: I, source: Source) -> HierarchyArena
    where
        I: IntoIterator<Item = DomainRef>,
    {
        let mut arena = HierarchyArena::default();
        let mut frontier: BTreeSet<DomainRef> = roots.into_iter().collect();
        let mut level = 0;

        while !frontier.is_empty() {
            if level > self.config.max_depth {
                for domain in frontier {
                    arena.insert_failed(
                        domain,
                        KnkError::corrupted(domain, "beyond maximum hierarchy depth"),
                    );
                }
                break;
            }

            let loaded = join_all(frontier.iter().map(|&domain| self.load_entity(domain, source))).await;

            let mut next = BTreeSet::new();
            for (domain, outcome) in frontier.into_iter().zip(loaded) {
                match outcome {
                    Ok(cached) => {
                        let stale = cached.is_stale();
                        let entity = cached.into_inner();
                        if let Some(parent) = entity.parent() {
                            next.insert(parent);
                        }
                        arena.insert_loaded(entity, stale);
                    }
                    Err(err) => {
                        debug!(%domain, error = %err, "Entity load failed");
                        arena.insert_failed(domain, err);
                    }
                }
            }

            next.retain(|domain| !arena.contains(*domain));
            frontier = next;
            level += 1;
        }

        arena
    }

    fn build_entry(
        &self,
        arena: &HierarchyArena,
        domain: DomainRef,
        requested_by: Vec<String>,
        mapping_stale: bool,
    ) -> ResolutionEntry {
        let alias = requested_by.first().map(String::as_str);
        let node = match arena.get(domain) {
            Some(node) => node,
            None => {
                return ResolutionEntry::failed(
                    DomainRegionSummary::placeholder(domain, alias),
                    KnkError::corrupted(domain, "node was never loaded"),
                    requested_by,
                )
            }
        };

        let chain = match arena.chain(domain, self.config.max_depth) {
            Ok(chain) => chain,
            Err(err) => {
                warn!(%domain, error = %err, "Hierarchy resolution failed");
                let summary = match &node.state {
                    NodeState::Loaded { entity, .. } => DomainRegionSummary::from_entity(entity, alias, Vec::new()),
                    NodeState::Failed(_) => DomainRegionSummary::placeholder(domain, alias),
                };
                return ResolutionEntry::failed(summary, err, requested_by);
            }
        };

        // Ancestors are summarized root first so each carries its own chain
        let mut parents: Vec<DomainRegionSummary> = Vec::with_capacity(chain.links.len() - 1);
        for (entity, _) in chain.links[1..].iter().rev() {
            let summary = DomainRegionSummary::from_entity(entity, None, parents.clone());
            parents.insert(0, summary);
        }
        let (entity, _) = chain.links[0];
        let summary = DomainRegionSummary::from_entity(entity, alias, parents);

        let effective = AccessDecision::deny_wins(
            chain
                .links
                .iter()
                .map(|(e, _)| AccessDecision::new(e.allow_entry(), e.allow_exit())),
        );
        let stale = chain.stale || mapping_stale;
        if stale {
            warn!(%domain, "Serving stale hierarchy data");
        }

        ResolutionEntry {
            summary,
            status: if stale {
                ResolutionStatus::Stale
            } else {
                ResolutionStatus::Resolved
            },
            effective,
            error: None,
            requested_by,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOOKUPS
    // ═══════════════════════════════════════════════════════════════════════════

    async fn lookup_region(&self, region_id: &str, source: Source) -> Result<Cached<Option<DomainRef>>> {
        match source {
            Source::Load(timeout) => {
                let provider = Arc::clone(&self.provider);
                self.regions
                    .get_or_stale(region_id.to_string(), timeout, move |id| async move {
                        provider.resolve_region(&id).await
                    })
                    .await
            }
            Source::CacheOnly => self
                .regions
                .peek(&region_id.to_string())
                .ok_or_else(|| KnkError::NotCached(format!("region '{}'", region_id))),
        }
    }

    async fn load_entity(&self, domain: DomainRef, source: Source) -> Result<Cached<DomainEntity>> {
        let timeout = match source {
            Source::Load(timeout) => timeout,
            Source::CacheOnly => {
                return self
                    .peek_entity(domain)
                    .ok_or_else(|| KnkError::NotCached(domain.to_string()))
            }
        };

        let caches = &self.caches;
        match domain.domain_type {
            DomainType::Town => caches
                .towns
                .get_or_stale(domain.id, timeout)
                .await
                .map(|c| c.map(DomainEntity::Town)),
            DomainType::District => caches
                .districts
                .get_or_stale(domain.id, timeout)
                .await
                .map(|c| c.map(DomainEntity::District)),
            DomainType::Street => caches
                .streets
                .get_or_stale(domain.id, timeout)
                .await
                .map(|c| c.map(DomainEntity::Street)),
            DomainType::Structure => caches
                .structures
                .get_or_stale(domain.id, timeout)
                .await
                .map(|c| c.map(DomainEntity::Structure)),
        }
    }

    fn peek_entity(&self, domain: DomainRef) -> Option<Cached<DomainEntity>> {
        let caches = &self.caches;
        match domain.domain_type {
            DomainType::Town => caches.towns.peek(domain.id).map(|c| c.map(DomainEntity::Town)),
            DomainType::District => caches.districts.peek(domain.id).map(|c| c.map(DomainEntity::District)),
            DomainType::Street => caches.streets.peek(domain.id).map(|c| c.map(DomainEntity::Street)),
            DomainType::Structure => caches
                .structures
                .peek(domain.id)
                .map(|c| c.map(DomainEntity::Structure)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REGION CACHE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Counters of the region mapping cache.
    pub fn region_cache_metrics(&self) -> &CacheMetrics {
        self.regions.metrics()
    }

    /// Number of cached region mappings, unmapped results included.
    pub fn region_cache_size(&self) -> usize {
        self.regions.size()
    }

    /// Drops one region mapping so the next resolution reloads it.
    pub fn invalidate_region(&self, region_id: &str) -> bool {
        self.regions.invalidate(&region_id.to_string())
    }

    /// Drops every region mapping. Entity caches are untouched.
    pub fn clear_region_cache(&self) {
        self.regions.clear();
    }
}
