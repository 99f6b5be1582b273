//! Identifier-object merges.
//!
//! After this merge one identifier object remains per `(scheme, literal)`
//! key, and every entity that referenced an absorbed object references the
//! survivor instead. The survivor object may therefore be shared by several
//! owners.

use tracing::debug;

use super::MergeEngine;
use crate::cluster::Cluster;
use crate::entity::{EntityHandle, IdentifierId};
use crate::error::IntegrityError;
use crate::provenance::MergeRecord;

impl MergeEngine<'_> {
    /// Collapse identifier objects with the same key into the survivor.
    ///
    /// # Errors
    /// - `MissingEntity` if a member or one of its owners is gone
    pub fn merge_identifiers(&mut self, cluster: &Cluster<IdentifierId>) -> Result<bool, IntegrityError> {
        let survivor = cluster.survivor;
        if self.graph.identifier(survivor).is_none() {
            return Err(IntegrityError::MissingEntity {
                handle: survivor.into(),
            });
        }
        if cluster.absorbed.is_empty() {
            return Ok(false);
        }

        let mut record = MergeRecord {
            shared_keys: cluster.shared_keys.clone(),
            ..MergeRecord::default()
        };
        record.snapshot.capture(self.graph, survivor.into());

        for member in &cluster.absorbed {
            let member = *member;
            if member == survivor {
                return Err(IntegrityError::SelfMerge {
                    handle: member.into(),
                });
            }
            record.snapshot.capture(self.graph, member.into());
            for owner in self.graph.owners_of(member) {
                record.snapshot.capture(self.graph, owner);
                repoint(self.graph.identifiers_of_mut(owner)?, member, survivor);
                if !record.rewired.contains(&owner) {
                    record.rewired.push(owner);
                }
            }
            self.graph.remove_identifier(member)?;
            self.redirect(member.into(), survivor.into());
            record.absorbed.push(EntityHandle::Identifier(member));
            self.stats.absorbed += 1;
            debug!(survivor = %survivor, absorbed = %member, "identifier absorbed");
        }

        self.commit_merge(survivor.into(), record)?;
        Ok(true)
    }
}

/// Replace `from` with `to` in place, or drop it if `to` is already listed.
fn repoint(list: &mut Vec<IdentifierId>, from: IdentifierId, to: IdentifierId) {
    if list.contains(&to) {
        list.retain(|id| *id != from);
    } else {
        for id in list.iter_mut() {
            if *id == from {
                *id = to;
            }
        }
    }
}
