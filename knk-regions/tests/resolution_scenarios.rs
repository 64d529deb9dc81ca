//! End-to-end resolution over an in-memory provider.

use std::sync::Arc;
use std::time::Duration;

use knk_cache::CacheConfig;
use knk_core::{
    AccessDecision, District, DomainRef, DomainRegionQuery, KnkError, RequestContext, ResolutionStatus, Street,
    Structure, Town,
};
use knk_provider::MemoryProvider;
use knk_regions::{CacheManager, RegionDomainResolver, ResolverConfig};

fn world(town_allows_entry: bool) -> MemoryProvider {
    let provider = MemoryProvider::new()
        .with_town(Town {
            id: 1,
            name: "Kingsport".into(),
            description: Some("Royal seat".into()),
            region_id: Some("region-town-1".into()),
            allow_entry: town_allows_entry,
            allow_exit: true,
        })
        .with_district(District {
            id: 5,
            name: "Harbor".into(),
            description: None,
            region_id: Some("region-district-5".into()),
            allow_entry: true,
            allow_exit: true,
            town_id: 1,
        })
        .with_street(Street {
            id: 3,
            name: "Quay Street".into(),
            description: None,
            region_id: None,
            allow_entry: true,
            allow_exit: true,
            district_id: 5,
        })
        .with_structure(Structure {
            id: 40,
            name: "Customs House".into(),
            description: None,
            region_id: Some("region-structure-40".into()),
            allow_entry: true,
            allow_exit: false,
            street_id: Some(3),
            district_id: 5,
            house_number: Some(12),
        });
    provider.map_region("harbor-alias", DomainRef::district(5));
    provider
}

fn setup(provider: MemoryProvider) -> (Arc<MemoryProvider>, CacheManager, Arc<RegionDomainResolver>) {
    let provider = Arc::new(provider);
    let manager = CacheManager::new(provider.clone(), &CacheConfig::default());
    let resolver = manager
        .build_resolver(provider.clone(), ResolverConfig::default())
        .unwrap();
    (provider, manager, resolver)
}

fn ctx() -> RequestContext {
    RequestContext::new()
}

#[tokio::test]
async fn top_down_lists_root_first() {
    let (_, _, resolver) = setup(world(true));
    let query = DomainRegionQuery::new(["region-district-5"], true);

    let resolution = resolver.resolve(&query, &ctx()).await;

    assert_eq!(
        resolution.domain_refs(),
        vec![DomainRef::town(1), DomainRef::district(5)]
    );
    assert!(resolution.entries.iter().all(|e| e.status == ResolutionStatus::Resolved));
}

#[tokio::test]
async fn bottom_up_lists_leaf_first() {
    let (_, _, resolver) = setup(world(true));
    let query = DomainRegionQuery::new(["region-district-5"], false);

    let resolution = resolver.resolve(&query, &ctx()).await;

    assert_eq!(
        resolution.domain_refs(),
        vec![DomainRef::district(5), DomainRef::town(1)]
    );
}

#[tokio::test]
async fn ancestor_chain_ignores_ordering_flag() {
    let (_, _, resolver) = setup(world(true));
    let top_down = resolver
        .resolve(&DomainRegionQuery::new(["region-structure-40"], true), &ctx())
        .await;
    let bottom_up = resolver
        .resolve(&DomainRegionQuery::new(["region-structure-40"], false), &ctx())
        .await;

    let a = &top_down.get(DomainRef::structure(40)).unwrap().summary;
    let b = &bottom_up.get(DomainRef::structure(40)).unwrap().summary;
    assert_eq!(a, b);

    let chain: Vec<_> = a.parent_domain_decisions.iter().map(|s| s.name.clone().unwrap()).collect();
    assert_eq!(chain, vec!["Quay Street", "Harbor", "Kingsport"]);
    // Each ancestor carries its own chain
    assert_eq!(a.parent_domain_decisions[1].parent_domain_decisions.len(), 1);

    assert_eq!(
        top_down.domain_refs(),
        vec![
            DomainRef::town(1),
            DomainRef::district(5),
            DomainRef::street(3),
            DomainRef::structure(40)
        ]
    );
}

#[tokio::test]
async fn deny_wins_over_ancestors() {
    let (_, _, resolver) = setup(world(false));
    let query = DomainRegionQuery::new(["region-district-5"], true);

    let resolution = resolver.resolve(&query, &ctx()).await;

    let district = resolution.get(DomainRef::district(5)).unwrap();
    assert!(district.summary.allow_entry);
    assert!(!district.effective.allow_entry);
    assert!(district.effective.allow_exit);
    assert_eq!(resolution.effective_access(), AccessDecision::new(false, true));
}

#[tokio::test]
async fn exit_denied_independently() {
    let (_, _, resolver) = setup(world(true));
    let access = resolver
        .effective_access(&DomainRegionQuery::new(["region-structure-40"], true), &ctx())
        .await;
    assert_eq!(access, AccessDecision::new(true, false));
}

#[tokio::test]
async fn unmapped_region_is_reported_not_fatal() {
    let (_, _, resolver) = setup(world(false));
    let query = DomainRegionQuery::new(["wilderness", "region-town-1"], true);

    let resolution = resolver.resolve(&query, &ctx()).await;

    assert_eq!(resolution.len(), 2);
    let last = resolution.entries.last().unwrap();
    assert_eq!(last.status, ResolutionStatus::Unmapped);
    assert_eq!(last.summary.domain_type, None);
    assert_eq!(last.summary.region_id.as_deref(), Some("wilderness"));
    assert!(matches!(&last.error, Some(KnkError::Unmapped(region)) if region == "wilderness"));
    // Unmapped regions do not loosen or tighten the decision
    assert_eq!(resolution.effective_access(), AccessDecision::new(false, true));
}

#[tokio::test(start_paused = true)]
async fn stale_town_served_when_provider_fails() {
    let (provider, _, resolver) = setup(world(true));
    let query = DomainRegionQuery::new(["region-district-5"], true);
    resolver.resolve(&query, &ctx()).await;

    tokio::time::advance(Duration::from_secs(61)).await;
    provider.fail_on(DomainRef::town(1));

    let resolution = resolver.resolve(&query, &ctx()).await;

    let town = resolution.get(DomainRef::town(1)).unwrap();
    assert_eq!(town.status, ResolutionStatus::Stale);
    assert_eq!(town.summary.name.as_deref(), Some("Kingsport"));
    assert_eq!(
        resolution.get(DomainRef::district(5)).unwrap().status,
        ResolutionStatus::Stale
    );
    assert!(!resolution.is_partial());
}

#[tokio::test]
async fn provider_failure_without_cache_is_scoped_to_entity() {
    let (provider, _, resolver) = setup(world(true));
    provider.fail_on(DomainRef::town(1));
    let query = DomainRegionQuery::new(["region-district-5", "wilderness"], true);

    let resolution = resolver.resolve(&query, &ctx()).await;

    let town = resolution.get(DomainRef::town(1)).unwrap();
    assert_eq!(town.status, ResolutionStatus::Failed);
    assert!(matches!(town.error, Some(KnkError::ProviderUnavailable(_))));

    let district = resolution.get(DomainRef::district(5)).unwrap();
    assert_eq!(district.status, ResolutionStatus::Failed);
    assert_eq!(district.effective, AccessDecision::DENY);
    assert_eq!(district.summary.name.as_deref(), Some("Harbor"));

    assert_eq!(resolution.entries.last().unwrap().status, ResolutionStatus::Unmapped);

    // The resolver recovers once the provider does
    provider.clear_failures();
    let retry = resolver.resolve(&query, &ctx()).await;
    assert!(!retry.is_partial());
}

#[tokio::test]
async fn missing_parent_is_corrupted_hierarchy() {
    let provider = world(true);
    provider.insert_district(District {
        id: 9,
        name: "Orphan".into(),
        description: None,
        region_id: Some("orphan".into()),
        allow_entry: true,
        allow_exit: true,
        town_id: 99,
    });
    let (_, _, resolver) = setup(provider);

    let resolution = resolver
        .resolve(&DomainRegionQuery::new(["orphan", "region-town-1"], true), &ctx())
        .await;

    let orphan = resolution.get(DomainRef::district(9)).unwrap();
    assert!(matches!(orphan.error, Some(KnkError::CorruptedHierarchy { .. })));
    assert_eq!(
        resolution.get(DomainRef::town(1)).unwrap().status,
        ResolutionStatus::Resolved
    );
}

#[tokio::test]
async fn duplicate_refs_in_batch_load_once() {
    let (provider, _, resolver) = setup(world(true));
    let query = DomainRegionQuery::new(["region-district-5", "harbor-alias", "region-town-1"], true);

    let resolution = resolver.resolve(&query, &ctx()).await;

    assert_eq!(resolution.len(), 2);
    let calls = provider.calls();
    assert_eq!((calls.towns, calls.districts, calls.regions), (1, 1, 3));
}

#[tokio::test]
async fn every_region_id_sharing_an_entity_is_reported() {
    let provider = world(true);
    provider.map_region("town-1-annex", DomainRef::town(1));
    let (_, _, resolver) = setup(provider);
    let query = DomainRegionQuery::new(["region-town-1", "town-1-annex"], true);

    let resolution = resolver.resolve(&query, &ctx()).await;

    assert_eq!(resolution.len(), 1);
    let town = resolution.get(DomainRef::town(1)).unwrap();
    assert_eq!(town.requested_by, vec!["region-town-1".to_string(), "town-1-annex".to_string()]);
    assert_eq!(town.summary.region_id.as_deref(), Some("region-town-1"));

    // An alias is reported even when the entity has its own region id
    let annex_only = resolver
        .resolve(&DomainRegionQuery::new(["town-1-annex"], true), &ctx())
        .await;
    assert_eq!(
        annex_only.get(DomainRef::town(1)).unwrap().requested_by,
        vec!["town-1-annex".to_string()]
    );
    assert_eq!(
        resolver.warm_cache(["region-town-1", "town-1-annex"], &ctx()).await,
        2
    );
}

#[tokio::test]
async fn concurrent_resolutions_coalesce() {
    let (provider, manager, resolver) = setup(world(true));
    let query = DomainRegionQuery::new(["region-structure-40"], true);

    let runs = (0..50).map(|_| {
        let (resolver, query, ctx) = (&resolver, &query, ctx());
        async move { resolver.resolve(query, &ctx).await }
    });
    let results = futures::future::join_all(runs).await;

    assert!(results.iter().all(|r| r.len() == 4 && !r.is_partial()));
    let calls = provider.calls();
    assert_eq!(calls.regions, 1);
    assert_eq!(calls.fetches(), 4);
    assert_eq!(manager.towns().metrics().misses(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_caller_but_load_completes() {
    let (provider, _, resolver) = setup(world(true));
    provider.set_latency(Some(Duration::from_secs(5)));
    let query = DomainRegionQuery::new(["region-town-1"], true);

    let hurried = resolver
        .resolve(&query, &RequestContext::with_timeout(Duration::from_millis(100)))
        .await;
    assert!(matches!(
        hurried.entries[0].error,
        Some(KnkError::Timeout { millis: 100 })
    ));

    let patient = resolver.resolve(&query, &ctx()).await;
    assert_eq!(patient.domain_refs(), vec![DomainRef::town(1)]);
    assert_eq!(provider.calls().regions, 1);
}

#[tokio::test]
async fn reset_then_clear_all() {
    let (_, manager, resolver) = setup(world(true));
    let query = DomainRegionQuery::new(["region-district-5"], true);
    resolver.resolve(&query, &ctx()).await;

    manager.reset_metrics();
    resolver.resolve(&query, &ctx()).await;
    assert_eq!(manager.districts().metrics().hits(), 1);
    assert_eq!(manager.districts().metrics().misses(), 0);
    assert_eq!(resolver.region_cache_metrics().hits(), 1);

    manager.clear_all();
    assert_eq!(manager.towns().size(), 0);
    assert_eq!(manager.districts().size(), 0);
    assert_eq!(manager.streets().size(), 0);
    assert_eq!(manager.structures().size(), 0);
    assert_eq!(resolver.region_cache_size(), 0);
}
