//! Region queries and their resolved, permission-annotated results.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::KnkError;
use crate::types::domain::{DomainEntity, DomainId, DomainRef, DomainType};

// ═══════════════════════════════════════════════════════════════════════════════
// QUERY
// ═══════════════════════════════════════════════════════════════════════════════

/// A batch of external region identifiers to resolve.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRegionQuery {
    /// Unique region identifiers; order carries no meaning
    pub region_ids: BTreeSet<String>,
    /// Root-to-leaf result ordering when true, leaf-to-root when false
    pub top_down_hierarchy: bool,
}

impl DomainRegionQuery {
    /// Creates a query, trimming identifiers and dropping duplicates.
    pub fn new<I, S>(region_ids: I, top_down_hierarchy: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            region_ids: region_ids
                .into_iter()
                .map(|id| id.into().trim().to_string())
                .collect(),
            top_down_hierarchy,
        }
    }

    /// Returns true if there is nothing to resolve.
    pub fn is_empty(&self) -> bool {
        self.region_ids.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUMMARY
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable projection of one resolved domain entity.
///
/// `parent_domain_decisions` is always nearest-ancestor-first, whatever
/// ordering the query asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRegionSummary {
    /// Entity identifier; `None` for unmapped regions
    pub id: Option<DomainId>,
    /// Display name
    pub name: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// External region identifier
    pub region_id: Option<String>,
    /// Entry permitted at this level
    pub allow_entry: bool,
    /// Exit permitted at this level
    pub allow_exit: bool,
    /// Kind of entity; `None` for unmapped regions
    pub domain_type: Option<DomainType>,
    /// Ancestors, nearest first
    pub parent_domain_decisions: Vec<DomainRegionSummary>,
}

impl DomainRegionSummary {
    /// Projects a loaded entity with its already-built ancestor summaries.
    pub fn from_entity(
        entity: &DomainEntity,
        region_alias: Option<&str>,
        parents: Vec<DomainRegionSummary>,
    ) -> Self {
        Self {
            id: Some(entity.id()),
            name: Some(entity.name().to_string()),
            description: entity.description().map(str::to_string),
            region_id: entity.region_id().or(region_alias).map(str::to_string),
            allow_entry: entity.allow_entry(),
            allow_exit: entity.allow_exit(),
            domain_type: Some(entity.domain_type()),
            parent_domain_decisions: parents,
        }
    }

    /// Summary for an entity whose record could not be loaded.
    pub fn placeholder(domain: DomainRef, region_alias: Option<&str>) -> Self {
        Self {
            id: Some(domain.id),
            name: None,
            description: None,
            region_id: region_alias.map(str::to_string),
            allow_entry: false,
            allow_exit: false,
            domain_type: Some(domain.domain_type),
            parent_domain_decisions: Vec::new(),
        }
    }

    /// Summary for a region identifier whose mapping could not be looked up.
    ///
    /// The domain is unknown, so nothing is allowed.
    pub fn unresolved(region_id: &str) -> Self {
        Self {
            allow_entry: false,
            allow_exit: false,
            ..Self::unmapped(region_id)
        }
    }

    /// Summary for a region identifier with no known domain.
    ///
    /// Unmapped regions place no restriction of their own.
    pub fn unmapped(region_id: &str) -> Self {
        Self {
            id: None,
            name: None,
            description: None,
            region_id: Some(region_id.to_string()),
            allow_entry: true,
            allow_exit: true,
            domain_type: None,
            parent_domain_decisions: Vec::new(),
        }
    }

    /// Typed reference, when the summary describes a known entity.
    pub fn domain_ref(&self) -> Option<DomainRef> {
        match (self.domain_type, self.id) {
            (Some(domain_type), Some(id)) => Some(DomainRef::new(domain_type, id)),
            _ => None,
        }
    }

    /// Best human-readable label: name, region, or reference.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(region) = &self.region_id {
            return region.clone();
        }
        self.domain_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown region".to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACCESS DECISION
// ═══════════════════════════════════════════════════════════════════════════════

/// Entry/exit permission pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Entry permitted
    pub allow_entry: bool,
    /// Exit permitted
    pub allow_exit: bool,
}

impl AccessDecision {
    /// Both directions permitted.
    pub const ALLOW: AccessDecision = AccessDecision {
        allow_entry: true,
        allow_exit: true,
    };

    /// Both directions denied.
    pub const DENY: AccessDecision = AccessDecision {
        allow_entry: false,
        allow_exit: false,
    };

    /// Creates a decision.
    pub const fn new(allow_entry: bool, allow_exit: bool) -> Self {
        Self {
            allow_entry,
            allow_exit,
        }
    }

    /// Deny-wins combination: each direction is granted only if both grant it.
    pub fn and(self, other: AccessDecision) -> AccessDecision {
        AccessDecision {
            allow_entry: self.allow_entry && other.allow_entry,
            allow_exit: self.allow_exit && other.allow_exit,
        }
    }

    /// Folds a chain of levels with the deny-wins rule. An empty chain allows.
    pub fn deny_wins<I>(levels: I) -> AccessDecision
    where
        I: IntoIterator<Item = AccessDecision>,
    {
        levels.into_iter().fold(AccessDecision::ALLOW, AccessDecision::and)
    }
}

impl Default for AccessDecision {
    fn default() -> Self {
        AccessDecision::ALLOW
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-entry outcome tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    /// Entity and every ancestor came from fresh data
    Resolved,
    /// Some level was served from an expired cache entry
    Stale,
    /// The region identifier has no domain mapping
    Unmapped,
    /// The entity or its ancestry could not be resolved
    Failed,
}

impl ResolutionStatus {
    /// Returns true for entries carrying usable domain data.
    pub fn is_usable(self) -> bool {
        matches!(self, ResolutionStatus::Resolved | ResolutionStatus::Stale)
    }
}

/// One element of a resolution result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionEntry {
    /// Projection of the entity (or the unmapped region)
    pub summary: DomainRegionSummary,
    /// Outcome tag
    pub status: ResolutionStatus,
    /// Inherited deny-wins decision over the entity and all its ancestors
    pub effective: AccessDecision,
    /// Why the entry failed, or `Unmapped` for unmapped regions
    pub error: Option<KnkError>,
    /// Query region identifiers that pointed here directly, in query order.
    /// Empty for ancestors pulled in only through the hierarchy.
    pub requested_by: Vec<String>,
}

impl ResolutionEntry {
    /// Entry for an unmapped region identifier.
    ///
    /// Carries [`KnkError::Unmapped`] for the caller's information; the
    /// status, not the error, decides how the entry counts.
    pub fn unmapped(region_id: &str) -> Self {
        Self {
            summary: DomainRegionSummary::unmapped(region_id),
            status: ResolutionStatus::Unmapped,
            effective: AccessDecision::ALLOW,
            error: Some(KnkError::Unmapped(region_id.to_string())),
            requested_by: vec![region_id.to_string()],
        }
    }

    /// Failed entry; failures always deny.
    pub fn failed(summary: DomainRegionSummary, error: KnkError, requested_by: Vec<String>) -> Self {
        Self {
            summary,
            status: ResolutionStatus::Failed,
            effective: AccessDecision::DENY,
            error: Some(error),
            requested_by,
        }
    }

    /// True if a query region identifier pointed here directly.
    pub fn is_requested(&self) -> bool {
        !self.requested_by.is_empty()
    }

    /// Typed reference to the entity, if known.
    pub fn domain_ref(&self) -> Option<DomainRef> {
        self.summary.domain_ref()
    }
}

/// Ordered result of resolving a [`DomainRegionQuery`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionResolution {
    /// Entries in the order the query asked for
    pub entries: Vec<ResolutionEntry>,
}

impl RegionResolution {
    /// Wraps already-ordered entries.
    pub fn new(entries: Vec<ResolutionEntry>) -> Self {
        Self { entries }
    }

    /// Overall deny-wins decision across the batch.
    ///
    /// Usable entries contribute their effective decision, failed entries
    /// deny, unmapped entries do not participate.
    pub fn effective_access(&self) -> AccessDecision {
        AccessDecision::deny_wins(
            self.entries
                .iter()
                .filter(|e| e.status != ResolutionStatus::Unmapped)
                .map(|e| e.effective),
        )
    }

    /// Looks up the entry for one entity.
    pub fn get(&self, domain: DomainRef) -> Option<&ResolutionEntry> {
        self.entries.iter().find(|e| e.domain_ref() == Some(domain))
    }

    /// Entries that carry usable domain data.
    pub fn usable(&self) -> impl Iterator<Item = &ResolutionEntry> {
        self.entries.iter().filter(|e| e.status.is_usable())
    }

    /// Entries that failed to resolve.
    pub fn failures(&self) -> impl Iterator<Item = &ResolutionEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == ResolutionStatus::Failed)
    }

    /// Returns true if at least one entry failed while others may have resolved.
    pub fn is_partial(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Ordered domain references of the entries, skipping unmapped regions.
    pub fn domain_refs(&self) -> Vec<DomainRef> {
        self.entries.iter().filter_map(|e| e.domain_ref()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(domain: DomainRef, effective: AccessDecision) -> ResolutionEntry {
        let mut summary = DomainRegionSummary::placeholder(domain, None);
        summary.allow_entry = effective.allow_entry;
        summary.allow_exit = effective.allow_exit;
        ResolutionEntry {
            summary,
            status: ResolutionStatus::Resolved,
            effective,
            error: None,
            requested_by: vec![domain.to_string()],
        }
    }

    #[test]
    fn test_query_dedupes_and_trims() {
        let query = DomainRegionQuery::new(["a", " a ", "b"], false);
        assert_eq!(query.region_ids.len(), 2);
        assert!(!query.top_down_hierarchy);
    }

    #[test]
    fn test_deny_wins() {
        let chain = [
            AccessDecision::new(true, true),
            AccessDecision::new(false, true),
            AccessDecision::new(true, true),
        ];
        assert_eq!(AccessDecision::deny_wins(chain), AccessDecision::new(false, true));
        assert_eq!(AccessDecision::deny_wins([]), AccessDecision::ALLOW);
    }

    #[test]
    fn test_effective_access_ignores_unmapped() {
        let resolution = RegionResolution::new(vec![
            resolved(DomainRef::town(1), AccessDecision::ALLOW),
            ResolutionEntry::unmapped("spawn"),
        ]);
        assert_eq!(resolution.effective_access(), AccessDecision::ALLOW);
        assert!(!resolution.is_partial());
    }

    #[test]
    fn test_effective_access_denies_on_failure() {
        let resolution = RegionResolution::new(vec![
            resolved(DomainRef::town(1), AccessDecision::ALLOW),
            ResolutionEntry::failed(
                DomainRegionSummary::placeholder(DomainRef::district(2), None),
                KnkError::ProviderUnavailable("down".into()),
                vec!["district-2".into()],
            ),
        ]);
        assert_eq!(resolution.effective_access(), AccessDecision::DENY);
        assert!(resolution.is_partial());
        assert_eq!(resolution.usable().count(), 1);
    }

    #[test]
    fn test_unmapped_entry_carries_reason() {
        let entry = ResolutionEntry::unmapped("spawn");
        assert_eq!(entry.error, Some(KnkError::Unmapped("spawn".into())));
        assert_eq!(entry.requested_by, vec!["spawn".to_string()]);
        assert!(entry.is_requested());

        let resolution = RegionResolution::new(vec![entry]);
        assert_eq!(resolution.failures().count(), 0);
    }

    #[test]
    fn test_summary_label_fallbacks() {
        assert_eq!(DomainRegionSummary::unmapped("spawn").label(), "spawn");
        assert_eq!(
            DomainRegionSummary::placeholder(DomainRef::street(4), None).label(),
            "street#4"
        );
    }
}
