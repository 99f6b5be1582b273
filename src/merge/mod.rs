//! Type-aware merging of clusters into their survivors.
//!
//! The engine mutates one working graph and stages one provenance entry per
//! merge (plus one per swept orphan). Per-kind behavior lives in
//! [`agents`], [`resources`] and [`identifiers`]; the pieces shared by every
//! kind (identifier union, redirect resolution) live here.
//!
//! References are always rewritten before the entity they pointed at is
//! removed. A lookup that hits a missing entity is an engine defect and
//! aborts with [`IntegrityError::MissingEntity`].

mod agents;
mod identifiers;
mod resources;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::MatchConfig;
use crate::entity::{BrId, EntityHandle, RaId};
use crate::error::IntegrityError;
use crate::graph::GraphStore;
use crate::provenance::{MergeRecord, ProvenanceRecorder, MAX_REDIRECT_HOPS};

/// Counters accumulated by a [`MergeEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Clusters that produced a merge.
    pub clusters: usize,
    /// Entities absorbed into a survivor.
    pub absorbed: usize,
    /// Entities removed as a side effect (collapsed roles, dropped identifiers).
    pub cascaded: usize,
    /// Orphan agents deleted by the sweep.
    pub swept: usize,
}

/// Merges clusters of one kind into their survivors.
pub struct MergeEngine<'a> {
    graph: &'a mut GraphStore,
    recorder: &'a mut ProvenanceRecorder,
    config: &'a MatchConfig,
    redirects: BTreeMap<EntityHandle, EntityHandle>,
    stats: MergeStats,
}

impl<'a> MergeEngine<'a> {
    /// Start merging into `graph`, staging entries on `recorder`.
    pub fn new(
        graph: &'a mut GraphStore,
        recorder: &'a mut ProvenanceRecorder,
        config: &'a MatchConfig,
    ) -> Self {
        Self {
            graph,
            recorder,
            config,
            redirects: BTreeMap::new(),
            stats: MergeStats::default(),
        }
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Follow the redirects left by earlier merges to the live entity.
    ///
    /// # Errors
    /// - `RedirectLoop` after [`MAX_REDIRECT_HOPS`] hops
    /// - `MissingEntity` if the chain ends at an entity that no longer exists
    fn resolve(&self, handle: EntityHandle) -> Result<EntityHandle, IntegrityError> {
        let mut current = handle;
        let mut hops = 0usize;
        while let Some(next) = self.redirects.get(&current) {
            hops += 1;
            if hops > MAX_REDIRECT_HOPS {
                return Err(IntegrityError::RedirectLoop { handle });
            }
            current = *next;
        }
        if self.graph.contains(current) {
            Ok(current)
        } else {
            Err(IntegrityError::MissingEntity { handle: current })
        }
    }

    fn resolve_resource(&self, id: BrId) -> Result<BrId, IntegrityError> {
        match self.resolve(id.into())? {
            EntityHandle::Resource(resolved) => Ok(resolved),
            other => Err(IntegrityError::MissingEntity { handle: other }),
        }
    }

    fn resolve_agent(&self, id: RaId) -> Result<RaId, IntegrityError> {
        match self.resolve(id.into())? {
            EntityHandle::Agent(resolved) => Ok(resolved),
            other => Err(IntegrityError::MissingEntity { handle: other }),
        }
    }

    /// Resolve every member and split into the lowest live handle and the rest.
    fn resolve_members<H: Ord + Copy>(
        &self,
        members: impl IntoIterator<Item = H>,
        resolve: impl Fn(&Self, H) -> Result<H, IntegrityError>,
    ) -> Result<Option<(H, Vec<H>)>, IntegrityError> {
        let mut live = BTreeSet::new();
        for member in members {
            live.insert(resolve(self, member)?);
        }
        let mut iter = live.into_iter();
        Ok(iter.next().map(|survivor| (survivor, iter.collect())))
    }

    fn redirect(&mut self, absorbed: EntityHandle, survivor: EntityHandle) {
        self.redirects.insert(absorbed, survivor);
    }

    /// Move identifiers from `from` to `to`, deduplicating by key.
    ///
    /// An identifier whose key `to` already carries is dropped from `from`;
    /// if no owner references it afterwards, the identifier object itself is
    /// deleted and recorded as cascaded.
    fn move_identifiers(
        &mut self,
        from: EntityHandle,
        to: EntityHandle,
        record: &mut MergeRecord,
    ) -> Result<(), IntegrityError> {
        let moving = std::mem::take(self.graph.identifiers_of_mut(from)?);
        let mut keys = self.graph.keys_of(to);

        for id in moving {
            let key = self
                .graph
                .identifier(id)
                .ok_or(IntegrityError::DanglingReference {
                    from,
                    to: id.into(),
                })?
                .key();

            if self.graph.identifiers_of(to).contains(&id) {
                continue;
            }
            if keys.contains(&key) {
                if self.graph.owners_of(id).is_empty() {
                    record.snapshot.capture(self.graph, id.into());
                    self.graph.remove_identifier(id)?;
                    record.cascaded.push(id.into());
                    self.stats.cascaded += 1;
                    debug!(identifier = %id, %key, "dropped duplicate identifier");
                }
                continue;
            }
            keys.insert(key);
            self.graph.identifiers_of_mut(to)?.push(id);
        }
        Ok(())
    }

    fn commit_merge(&mut self, survivor: EntityHandle, record: MergeRecord) -> Result<(), IntegrityError> {
        let absorbed = record.absorbed.len();
        let entry = self.recorder.record_merge(survivor, record)?;
        debug!(
            sequence = entry.sequence,
            survivor = %survivor,
            absorbed,
            cascaded = entry.cascaded.len(),
            "merge recorded"
        );
        self.stats.clusters += 1;
        Ok(())
    }
}
