//! Identifier index: `(scheme, literal)` to the entities carrying it.
//!
//! Matching is exact on the key. The index is rebuilt from the graph at the
//! start of every phase and discarded afterwards.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity::{BrId, EntityHandle, IdentifierId, RaId};
use crate::graph::GraphStore;
use crate::identifier::IdentifierKey;

/// Maps identifier keys to the set of handles that carry them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierIndex<H: Ord + Copy> {
    entries: BTreeMap<IdentifierKey, BTreeSet<H>>,
    members: BTreeSet<H>,
}

impl<H: Ord + Copy> Default for IdentifierIndex<H> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            members: BTreeSet::new(),
        }
    }
}

impl<H: Ord + Copy> IdentifierIndex<H> {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity without keys, so it still counts as a node.
    pub fn add_member(&mut self, handle: H) {
        self.members.insert(handle);
    }

    /// Record that `handle` carries `key`.
    pub fn insert(&mut self, key: IdentifierKey, handle: H) {
        self.members.insert(handle);
        self.entries.entry(key).or_default().insert(handle);
    }

    /// Handles carrying `key`.
    #[must_use]
    pub fn get(&self, key: &IdentifierKey) -> Option<&BTreeSet<H>> {
        self.entries.get(key)
    }

    /// Keys carried by more than one entity.
    pub fn shared(&self) -> impl Iterator<Item = (&IdentifierKey, &BTreeSet<H>)> {
        self.entries.iter().filter(|(_, owners)| owners.len() > 1)
    }

    /// Every entity registered in the index.
    #[must_use]
    pub fn members(&self) -> &BTreeSet<H> {
        &self.members
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys carried by at least two of `handles`.
    ///
    /// Used to report why a cluster was formed.
    #[must_use]
    pub fn keys_linking(&self, handles: &BTreeSet<H>) -> Vec<IdentifierKey> {
        self.entries
            .iter()
            .filter(|(_, owners)| owners.intersection(handles).count() > 1)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl IdentifierIndex<RaId> {
    /// Index agents by their own identifiers and by the identifiers of the
    /// roles they hold.
    #[must_use]
    pub fn for_agents(graph: &GraphStore) -> Self {
        let mut index = Self::new();
        for ra in graph.agents() {
            index.add_member(ra.id);
            for key in graph.keys_of(EntityHandle::Agent(ra.id)) {
                index.insert(key, ra.id);
            }
        }
        for ar in graph.roles() {
            for key in graph.keys_of(EntityHandle::Role(ar.id)) {
                index.insert(key, ar.held_by);
            }
        }
        index
    }
}

impl IdentifierIndex<BrId> {
    /// Index resources by their own identifiers.
    #[must_use]
    pub fn for_resources(graph: &GraphStore) -> Self {
        let mut index = Self::new();
        for br in graph.resources() {
            index.add_member(br.id);
            for key in graph.keys_of(EntityHandle::Resource(br.id)) {
                index.insert(key, br.id);
            }
        }
        index
    }
}

impl IdentifierIndex<IdentifierId> {
    /// Index identifier objects by their own key.
    #[must_use]
    pub fn for_identifiers(graph: &GraphStore) -> Self {
        let mut index = Self::new();
        for identifier in graph.identifiers() {
            index.insert(identifier.key(), identifier.id);
        }
        index
    }
}
