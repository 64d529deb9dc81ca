//! Arena of loaded domain nodes and guarded ancestor walks.

use std::collections::{HashMap, HashSet};

use knk_core::error::{KnkError, Result};
use knk_core::types::{DomainEntity, DomainRef};

/// Load outcome for one node.
#[derive(Clone, Debug)]
pub(crate) enum NodeState {
    Loaded { entity: DomainEntity, stale: bool },
    Failed(KnkError),
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub domain: DomainRef,
    pub parent: Option<DomainRef>,
    pub state: NodeState,
}

/// Flat store of every node touched by one resolution, indexed by ref.
///
/// Parent links are plain refs into the index, never owning pointers, so a
/// malformed link can at worst produce a walk error.
#[derive(Debug, Default)]
pub(crate) struct HierarchyArena {
    nodes: Vec<Node>,
    index: HashMap<DomainRef, usize>,
}

/// Result of walking one node up to its root.
#[derive(Debug)]
pub(crate) struct Chain<'a> {
    /// The node itself, then its ancestors nearest first
    pub links: Vec<(&'a DomainEntity, DomainRef)>,
    /// True if any link was served stale
    pub stale: bool,
}

impl HierarchyArena {
    pub fn insert_loaded(&mut self, entity: DomainEntity, stale: bool) {
        let domain = entity.domain_ref();
        let parent = entity.parent();
        self.insert(Node {
            domain,
            parent,
            state: NodeState::Loaded { entity, stale },
        });
    }

    pub fn insert_failed(&mut self, domain: DomainRef, error: KnkError) {
        self.insert(Node {
            domain,
            parent: None,
            state: NodeState::Failed(error),
        });
    }

    fn insert(&mut self, node: Node) {
        match self.index.get(&node.domain) {
            Some(&slot) => self.nodes[slot] = node,
            None => {
                self.index.insert(node.domain, self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    pub fn contains(&self, domain: DomainRef) -> bool {
        self.index.contains_key(&domain)
    }

    pub fn get(&self, domain: DomainRef) -> Option<&Node> {
        self.index.get(&domain).map(|&slot| &self.nodes[slot])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Walks from `start` to its root.
    ///
    /// Fails with `CorruptedHierarchy` on a revisited node, a parent of the
    /// wrong kind, a missing parent, a chain longer than `max_depth`, or a
    /// structure whose street lies in a different district than it declares.
    /// Any other ancestor failure is passed through unchanged.
    pub fn chain(&self, start: DomainRef, max_depth: usize) -> Result<Chain<'_>> {
        let node = self
            .get(start)
            .ok_or_else(|| KnkError::corrupted(start, "node was never loaded"))?;
        let (entity, mut stale) = match &node.state {
            NodeState::Loaded { entity, stale } => (entity, *stale),
            NodeState::Failed(err) => return Err(err.clone()),
        };

        let mut links = vec![(entity, start)];
        let mut visited = HashSet::from([start]);
        let mut current = node;

        while let Some(parent) = current.parent {
            if !visited.insert(parent) {
                return Err(KnkError::corrupted(start, format!("cycle through {}", parent)));
            }
            if !current.domain.domain_type.accepts_parent(parent.domain_type) {
                return Err(KnkError::corrupted(
                    start,
                    format!("{} cannot be contained by {}", current.domain, parent),
                ));
            }
            if links.len() > max_depth {
                return Err(KnkError::corrupted(
                    start,
                    format!("ancestor chain exceeds {} levels", max_depth),
                ));
            }

            let parent_node = self
                .get(parent)
                .ok_or_else(|| KnkError::corrupted(start, format!("parent {} was never loaded", parent)))?;
            match &parent_node.state {
                NodeState::Loaded { entity, stale: parent_stale } => {
                    stale |= *parent_stale;
                    links.push((entity, parent));
                }
                NodeState::Failed(KnkError::NotFound { .. }) => {
                    return Err(KnkError::corrupted(
                        start,
                        format!("parent {} does not exist", parent),
                    ));
                }
                NodeState::Failed(err) => return Err(err.clone()),
            }
            current = parent_node;
        }

        if let Some(district_id) = entity.declared_district() {
            let declared = DomainRef::district(district_id);
            if !links.iter().any(|(_, domain)| *domain == declared) {
                return Err(KnkError::corrupted(
                    start,
                    format!("street does not belong to declared {}", declared),
                ));
            }
        }

        Ok(Chain { links, stale })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knk_core::types::{District, DomainType, Street, Structure, Town};
    use std::sync::Arc;

    fn town(id: u32, allow_entry: bool) -> DomainEntity {
        DomainEntity::Town(Arc::new(Town {
            id,
            name: format!("Town {}", id),
            description: None,
            region_id: None,
            allow_entry,
            allow_exit: true,
        }))
    }

    fn district(id: u32, town_id: u32) -> DomainEntity {
        DomainEntity::District(Arc::new(District {
            id,
            name: format!("District {}", id),
            description: None,
            region_id: None,
            allow_entry: true,
            allow_exit: true,
            town_id,
        }))
    }

    fn street(id: u32, district_id: u32) -> DomainEntity {
        DomainEntity::Street(Arc::new(Street {
            id,
            name: format!("Street {}", id),
            description: None,
            region_id: None,
            allow_entry: true,
            allow_exit: true,
            district_id,
        }))
    }

    fn structure(id: u32, street_id: Option<u32>, district_id: u32) -> DomainEntity {
        DomainEntity::Structure(Arc::new(Structure {
            id,
            name: format!("Structure {}", id),
            description: None,
            region_id: None,
            allow_entry: true,
            allow_exit: true,
            street_id,
            district_id,
            house_number: None,
        }))
    }

    fn is_corrupted(result: Result<Chain<'_>>) -> bool {
        matches!(result, Err(KnkError::CorruptedHierarchy { .. }))
    }

    #[test]
    fn test_chain_nearest_first() {
        let mut arena = HierarchyArena::default();
        arena.insert_loaded(structure(9, Some(3), 5), false);
        arena.insert_loaded(street(3, 5), false);
        arena.insert_loaded(district(5, 1), true);
        arena.insert_loaded(town(1, true), false);

        let chain = arena.chain(DomainRef::structure(9), 8).unwrap();
        let order: Vec<_> = chain.links.iter().map(|(_, d)| *d).collect();
        assert_eq!(
            order,
            vec![
                DomainRef::structure(9),
                DomainRef::street(3),
                DomainRef::district(5),
                DomainRef::town(1)
            ]
        );
        assert!(chain.stale);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut arena = HierarchyArena::default();
        arena.insert(Node {
            domain: DomainRef::district(5),
            parent: Some(DomainRef::district(6)),
            state: NodeState::Loaded {
                entity: district(5, 1),
                stale: false,
            },
        });
        arena.insert(Node {
            domain: DomainRef::district(6),
            parent: Some(DomainRef::district(5)),
            state: NodeState::Loaded {
                entity: district(6, 1),
                stale: false,
            },
        });
        arena.insert(Node {
            domain: DomainRef::town(1),
            parent: Some(DomainRef::town(1)),
            state: NodeState::Loaded {
                entity: town(1, true),
                stale: false,
            },
        });

        // District to district is rejected before the walk can loop
        assert!(is_corrupted(arena.chain(DomainRef::district(5), 8)));
        // Self-reference is a cycle
        let err = arena.chain(DomainRef::town(1), 8).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_depth_limit() {
        let mut arena = HierarchyArena::default();
        arena.insert_loaded(street(3, 5), false);
        arena.insert_loaded(district(5, 1), false);
        arena.insert_loaded(town(1, true), false);

        assert!(arena.chain(DomainRef::street(3), 2).is_ok());
        assert!(is_corrupted(arena.chain(DomainRef::street(3), 1)));
    }

    #[test]
    fn test_missing_parent() {
        let mut arena = HierarchyArena::default();
        arena.insert_loaded(district(5, 1), false);
        arena.insert_failed(
            DomainRef::town(1),
            KnkError::NotFound {
                domain_type: DomainType::Town,
                id: 1,
            },
        );
        assert!(is_corrupted(arena.chain(DomainRef::district(5), 8)));

        // Never loaded at all
        arena.insert_loaded(district(6, 2), false);
        assert!(is_corrupted(arena.chain(DomainRef::district(6), 8)));
    }

    #[test]
    fn test_unavailable_ancestor_passes_through() {
        let mut arena = HierarchyArena::default();
        arena.insert_loaded(district(5, 1), false);
        arena.insert_failed(DomainRef::town(1), KnkError::ProviderUnavailable("down".into()));

        let err = arena.chain(DomainRef::district(5), 8).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_structure_street_in_other_district() {
        let mut arena = HierarchyArena::default();
        arena.insert_loaded(structure(9, Some(3), 7), false);
        arena.insert_loaded(street(3, 5), false);
        arena.insert_loaded(district(5, 1), false);
        arena.insert_loaded(town(1, true), false);

        assert!(is_corrupted(arena.chain(DomainRef::structure(9), 8)));
        assert_eq!(arena.nodes().count(), 4);
    }
}
