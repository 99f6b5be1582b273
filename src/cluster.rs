//! Merge clusters from an identifier index.
//!
//! Entities are nodes; two entities are connected when they share at least one
//! identifier key. Connected components are found with a union-find over the
//! index members. Components with fewer than two members are dropped.
//!
//! Survivor rule: the member with the lowest handle (earliest creation)
//! survives and every other member is absorbed. Handles are totally ordered
//! and never reused, so the rule is stable across runs.
//!
//! Clusters are returned largest first, ties broken by survivor handle.

use std::collections::{BTreeMap, BTreeSet};

use crate::identifier::IdentifierKey;
use crate::index::IdentifierIndex;

/// A set of entities to collapse into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster<H> {
    /// Canonical member (lowest handle).
    pub survivor: H,
    /// Remaining members, ascending.
    pub absorbed: Vec<H>,
    /// Keys that link members of this cluster.
    pub shared_keys: Vec<IdentifierKey>,
}

impl<H: Copy> Cluster<H> {
    /// Number of members, survivor included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.absorbed.len() + 1
    }

    /// Clusters always have a survivor.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Survivor followed by absorbed members.
    pub fn members(&self) -> impl Iterator<Item = H> + '_ {
        std::iter::once(self.survivor).chain(self.absorbed.iter().copied())
    }
}

/// Disjoint-set forest over dense indices, with path halving and union by size.
#[derive(Debug)]
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// Builds merge clusters from an [`IdentifierIndex`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ClusterBuilder;

impl ClusterBuilder {
    /// Extract every component with two or more members.
    #[must_use]
    pub fn build<H: Ord + Copy>(index: &IdentifierIndex<H>) -> Vec<Cluster<H>> {
        let nodes: Vec<H> = index.members().iter().copied().collect();
        let position: BTreeMap<H, usize> = nodes.iter().enumerate().map(|(i, h)| (*h, i)).collect();

        let mut forest = UnionFind::new(nodes.len());
        for (_, owners) in index.shared() {
            let mut owners = owners.iter().filter_map(|h| position.get(h).copied());
            if let Some(first) = owners.next() {
                for other in owners {
                    forest.union(first, other);
                }
            }
        }

        let mut components: BTreeMap<usize, BTreeSet<H>> = BTreeMap::new();
        for (i, handle) in nodes.iter().enumerate() {
            let root = forest.find(i);
            components.entry(root).or_default().insert(*handle);
        }

        let mut clusters: Vec<Cluster<H>> = components
            .into_values()
            .filter(|members| members.len() > 1)
            .filter_map(|members| {
                let shared_keys = index.keys_linking(&members);
                let mut iter = members.into_iter();
                let survivor = iter.next()?;
                Some(Cluster {
                    survivor,
                    absorbed: iter.collect(),
                    shared_keys,
                })
            })
            .collect();

        clusters.sort_by(|a, b| b.len().cmp(&a.len()).then(a.survivor.cmp(&b.survivor)));
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Scheme;

    fn key(literal: &str) -> IdentifierKey {
        IdentifierKey::new(Scheme::Doi, literal)
    }

    #[test]
    fn test_singletons_are_dropped() {
        let mut index = IdentifierIndex::new();
        index.insert(key("a"), 1u64);
        index.insert(key("b"), 2u64);
        assert!(ClusterBuilder::build(&index).is_empty());
    }

    #[test]
    fn test_transitive_sharing_forms_one_cluster() {
        let mut index = IdentifierIndex::new();
        index.insert(key("a"), 3u64);
        index.insert(key("a"), 1u64);
        index.insert(key("b"), 1u64);
        index.insert(key("b"), 7u64);
        index.add_member(9u64);

        let clusters = ClusterBuilder::build(&index);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].survivor, 1);
        assert_eq!(clusters[0].absorbed, vec![3, 7]);
        assert_eq!(clusters[0].shared_keys, vec![key("a"), key("b")]);
    }

    #[test]
    fn test_clusters_sorted_by_size_then_survivor() {
        let mut index = IdentifierIndex::new();
        for h in [10u64, 11] {
            index.insert(key("small"), h);
        }
        for h in [20u64, 21, 22] {
            index.insert(key("big"), h);
        }
        for h in [2u64, 5] {
            index.insert(key("early"), h);
        }

        let clusters = ClusterBuilder::build(&index);
        let survivors: Vec<u64> = clusters.iter().map(|c| c.survivor).collect();
        assert_eq!(survivors, vec![20, 2, 10]);
    }

    #[test]
    fn test_survivor_is_independent_of_insertion_order() {
        let mut forward = IdentifierIndex::new();
        let mut backward = IdentifierIndex::new();
        for h in 1u64..=5 {
            forward.insert(key("x"), h);
        }
        for h in (1u64..=5).rev() {
            backward.insert(key("x"), h);
        }
        assert_eq!(ClusterBuilder::build(&forward), ClusterBuilder::build(&backward));
    }
}
