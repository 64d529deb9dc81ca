//! Entry/exit decisions for a move between two sets of regions.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use knk_core::traits::RequestContext;
use knk_core::types::{
    DomainRef, DomainRegionQuery, DomainType, RegionResolution, ResolutionEntry,
};

use crate::resolver::RegionDomainResolver;

/// Direction of a transition decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Moving into a domain
    Enter,
    /// Moving out of a domain
    Exit,
}

/// Outcome of evaluating a move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDecision {
    /// Whether the move may proceed
    pub allowed: bool,
    /// Direction the decision is about
    pub kind: TransitionKind,
    /// Text to show the player, if any
    pub message: Option<String>,
}

impl TransitionDecision {
    /// An allowed move.
    pub fn allow(kind: TransitionKind, message: Option<String>) -> Self {
        Self {
            allowed: true,
            kind,
            message,
        }
    }

    /// A denied move.
    pub fn deny(kind: TransitionKind, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            kind,
            message: Some(message.into()),
        }
    }
}

/// Domains entered and left by one move, each ordered town first.
struct Delta<'a> {
    entered: Vec<&'a ResolutionEntry>,
    left: Vec<&'a ResolutionEntry>,
    unverified: Vec<&'a ResolutionEntry>,
}

/// Decides whether a player may move from one set of regions to another.
///
/// Entry is checked before exit, and within each the outermost domain kind
/// wins: towns, then districts, streets and structures. Each entered domain is
/// judged by its own `allow_entry`; ancestors entered in the same move are
/// entered domains too and get checked in turn.
pub struct RegionTransitionService {
    resolver: Arc<RegionDomainResolver>,
}

impl RegionTransitionService {
    /// Creates a service resolving through `resolver`.
    pub fn new(resolver: Arc<RegionDomainResolver>) -> Self {
        Self { resolver }
    }

    /// Evaluates a move from `old_regions` to `new_regions`.
    #[instrument(skip_all)]
    pub async fn evaluate<I, J, S>(&self, old_regions: I, new_regions: J, ctx: &RequestContext) -> TransitionDecision
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let old_query = DomainRegionQuery::new(old_regions, true);
        let new_query = DomainRegionQuery::new(new_regions, true);
        let (old, new) = futures::join!(
            self.resolver.resolve(&old_query, ctx),
            self.resolver.resolve(&new_query, ctx)
        );

        let delta = compute_delta(&old, &new, &old_query);
        debug!(
            entered = delta.entered.len(),
            left = delta.left.len(),
            unverified = delta.unverified.len(),
            "Computed transition"
        );

        if let Some(decision) = check_denials(&delta) {
            info!(message = ?decision.message, kind = ?decision.kind, "Transition denied");
            return decision;
        }
        priority_message(&delta)
    }
}

fn compute_delta<'a>(
    old: &'a RegionResolution,
    new: &'a RegionResolution,
    old_query: &DomainRegionQuery,
) -> Delta<'a> {
    let old_usable: BTreeSet<DomainRef> = old.usable().filter_map(ResolutionEntry::domain_ref).collect();
    let new_known: BTreeSet<DomainRef> = new.entries.iter().filter_map(ResolutionEntry::domain_ref).collect();

    let entered = new
        .usable()
        .filter(|e| e.domain_ref().is_some_and(|d| !old_usable.contains(&d)))
        .collect();
    let left = old
        .usable()
        .filter(|e| e.domain_ref().is_some_and(|d| !new_known.contains(&d)))
        .collect();

    // A failure only blocks if the player was not already standing there
    let unverified = new
        .failures()
        .filter(|e| match e.domain_ref() {
            Some(domain) => !old_usable.contains(&domain),
            None => e
                .summary
                .region_id
                .as_ref()
                .map_or(true, |region| !old_query.region_ids.contains(region)),
        })
        .collect();

    Delta {
        entered: by_priority(entered),
        left: by_priority(left),
        unverified,
    }
}

fn by_priority(mut entries: Vec<&ResolutionEntry>) -> Vec<&ResolutionEntry> {
    entries.sort_by_key(|e| e.domain_ref().map(|d| (d.domain_type.rank(), d.id)));
    entries
}

fn check_denials(delta: &Delta<'_>) -> Option<TransitionDecision> {
    if let Some(entry) = delta.unverified.first() {
        return Some(TransitionDecision::deny(
            TransitionKind::Enter,
            format!("Access to {} could not be verified.", entry.summary.label()),
        ));
    }
    if let Some(entry) = delta.entered.iter().find(|e| !e.summary.allow_entry) {
        return Some(TransitionDecision::deny(
            TransitionKind::Enter,
            format!("You are not allowed to enter {}.", entry.summary.label()),
        ));
    }
    if let Some(entry) = delta.left.iter().find(|e| !e.summary.allow_exit) {
        return Some(TransitionDecision::deny(
            TransitionKind::Exit,
            format!("You are not allowed to leave {}.", entry.summary.label()),
        ));
    }
    None
}

fn first_of<'a>(entries: &[&'a ResolutionEntry], domain_type: DomainType) -> Option<&'a ResolutionEntry> {
    entries
        .iter()
        .copied()
        .find(|e| e.summary.domain_type == Some(domain_type))
}

fn priority_message(delta: &Delta<'_>) -> TransitionDecision {
    if let Some(town) = first_of(&delta.entered, DomainType::Town) {
        return TransitionDecision::allow(
            TransitionKind::Enter,
            Some(format!("You are now entering {}.", town.summary.label())),
        );
    }
    if let Some(town) = first_of(&delta.left, DomainType::Town) {
        return TransitionDecision::allow(
            TransitionKind::Exit,
            Some(format!("You are now leaving {}.", town.summary.label())),
        );
    }
    if let Some(district) = first_of(&delta.entered, DomainType::District) {
        let message = match district.summary.parent_domain_decisions.first() {
            Some(town) => format!("You are now entering {} * {} *", district.summary.label(), town.label()),
            None => format!("You are now entering {}.", district.summary.label()),
        };
        return TransitionDecision::allow(TransitionKind::Enter, Some(message));
    }
    if let Some(structure) = first_of(&delta.entered, DomainType::Structure) {
        return TransitionDecision::allow(
            TransitionKind::Enter,
            Some(format!("You are now entering {}.", structure.summary.label())),
        );
    }

    let kind = if delta.entered.is_empty() {
        TransitionKind::Exit
    } else {
        TransitionKind::Enter
    };
    TransitionDecision::allow(kind, None)
}
