//! Responsible-agent merges and the orphan sweep.

use std::collections::BTreeMap;

use tracing::debug;

use super::MergeEngine;
use crate::cluster::Cluster;
use crate::entity::{ArId, BrId, EntityHandle, Mergeable, RaId, RoleType};
use crate::error::IntegrityError;
use crate::identifier::IdentifierKey;
use crate::provenance::{MergeRecord, MergeSnapshot};

impl MergeEngine<'_> {
    /// Merge one cluster of agents into its survivor.
    ///
    /// Roles held by absorbed agents are re-pointed at the survivor before the
    /// absorbed agents are removed. Returns `false` when every member already
    /// resolves to the same agent.
    ///
    /// # Errors
    /// - `MissingEntity` if a member or one of its roles is gone
    pub fn merge_agents(&mut self, cluster: &Cluster<RaId>) -> Result<bool, IntegrityError> {
        let Some((survivor, absorbed)) =
            self.resolve_members(cluster.members(), Self::resolve_agent)?
        else {
            return Ok(false);
        };
        self.merge_agent_group(survivor, absorbed, cluster.shared_keys.clone())
    }

    pub(super) fn merge_agent_group(
        &mut self,
        survivor: RaId,
        absorbed: Vec<RaId>,
        shared_keys: Vec<IdentifierKey>,
    ) -> Result<bool, IntegrityError> {
        if absorbed.is_empty() {
            return Ok(false);
        }
        let mut record = MergeRecord {
            shared_keys,
            ..MergeRecord::default()
        };
        record.snapshot.capture(self.graph, survivor.into());

        for member in absorbed {
            self.absorb_agent(survivor, member, &mut record)?;
        }
        if self.config.collapse_duplicate_roles {
            self.collapse_duplicate_roles(survivor, &mut record)?;
        }
        self.commit_merge(survivor.into(), record)?;
        Ok(true)
    }

    fn absorb_agent(
        &mut self,
        survivor: RaId,
        member: RaId,
        record: &mut MergeRecord,
    ) -> Result<(), IntegrityError> {
        let absorbed = self
            .graph
            .agent(member)
            .cloned()
            .ok_or(IntegrityError::MissingEntity {
                handle: member.into(),
            })?;
        record.snapshot.capture(self.graph, member.into());

        for ar in self.graph.roles_held_by(member) {
            record.snapshot.capture(self.graph, ar.into());
            self.graph.role_mut(ar)?.held_by = survivor;
            record.rewired.push(ar.into());
        }
        self.move_identifiers(member.into(), survivor.into(), record)?;
        self.graph.agent_mut(survivor)?.absorb_attributes(&absorbed);

        self.graph.remove_agent(member)?;
        self.redirect(absorbed.handle(), survivor.into());
        record.absorbed.push(member.into());
        self.stats.absorbed += 1;
        debug!(survivor = %survivor, absorbed = %member, "agent absorbed");
        Ok(())
    }

    /// Collapse roles of `agent` that duplicate each other on one resource.
    ///
    /// Roles are duplicates when they share resource, role type and agent.
    /// The lowest handle is kept; the others hand over their identifiers and
    /// are removed from the resource and from the graph.
    fn collapse_duplicate_roles(
        &mut self,
        agent: RaId,
        record: &mut MergeRecord,
    ) -> Result<(), IntegrityError> {
        let mut groups: BTreeMap<(BrId, RoleType), Vec<ArId>> = BTreeMap::new();
        for ar in self.graph.roles_held_by(agent) {
            let role = self.graph.role(ar).ok_or(IntegrityError::MissingEntity {
                handle: ar.into(),
            })?;
            groups
                .entry((role.resource, role.role.clone()))
                .or_default()
                .push(ar);
        }

        for ((resource, _), mut roles) in groups {
            if roles.len() < 2 {
                continue;
            }
            roles.sort();
            let kept = roles[0];
            record.snapshot.capture(self.graph, resource.into());
            for duplicate in roles.into_iter().skip(1) {
                record.snapshot.capture(self.graph, duplicate.into());
                self.move_identifiers(duplicate.into(), kept.into(), record)?;
                self.graph
                    .resource_mut(resource)?
                    .contributors
                    .retain(|ar| *ar != duplicate);
                self.graph.remove_role(duplicate)?;
                self.redirect(duplicate.into(), kept.into());
                record.cascaded.push(duplicate.into());
                self.stats.cascaded += 1;
                debug!(kept = %kept, removed = %duplicate, %resource, "duplicate role collapsed");
            }
        }
        Ok(())
    }

    /// Delete every agent no role refers to.
    ///
    /// Runs once after the agent merges and does not re-trigger clustering.
    /// Each deleted agent gets its own provenance entry; identifiers it was
    /// the last owner of are deleted with it.
    ///
    /// # Errors
    /// - `MissingEntity` if an agent disappears during the sweep
    pub fn sweep_orphan_agents(&mut self) -> Result<Vec<RaId>, IntegrityError> {
        let held = self.graph.roles_by_agent();
        let orphans: Vec<RaId> = self
            .graph
            .agents()
            .map(|ra| ra.id)
            .filter(|id| !held.contains_key(id))
            .collect();

        for agent in &orphans {
            let mut snapshot = MergeSnapshot::default();
            snapshot.capture(self.graph, (*agent).into());
            let removed = self.graph.remove_agent(*agent)?;

            let mut cascaded = Vec::new();
            for id in removed.identifiers {
                if self.graph.owners_of(id).is_empty() {
                    snapshot.capture(self.graph, id.into());
                    self.graph.remove_identifier(id)?;
                    cascaded.push(EntityHandle::Identifier(id));
                }
            }
            self.stats.cascaded += cascaded.len();
            self.stats.swept += 1;
            let entry = self.recorder.record_delete((*agent).into(), cascaded, snapshot);
            debug!(sequence = entry.sequence, agent = %agent, "orphan agent deleted");
        }
        Ok(orphans)
    }
}
