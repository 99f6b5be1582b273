//! Bibliographic-resource merges with container and publisher reconciliation.
//!
//! Roles of absorbed resources are moved onto the survivor as they are.
//! Duplicate roles pointing at the same agent are not collapsed here: that
//! happens in the agent phase, which must run first for duplicate-free
//! results.

use tracing::debug;

use super::MergeEngine;
use crate::cluster::Cluster;
use crate::entity::{BrId, EntityHandle, Mergeable, RaId};
use crate::error::IntegrityError;
use crate::graph::MAX_CONTAINER_DEPTH;
use crate::identifier::IdentifierKey;
use crate::provenance::MergeRecord;
use crate::similarity::titles_agree;

/// Reconciliation work discovered while absorbing one resource.
#[derive(Debug, Default)]
struct Followups {
    containers: Vec<(BrId, BrId)>,
    publishers: Vec<(RaId, RaId, Vec<IdentifierKey>)>,
}

impl MergeEngine<'_> {
    /// Merge one cluster of resources into its survivor.
    ///
    /// Same-typed containers whose titles agree are merged recursively up the
    /// hierarchy, and publishers sharing an identifier are merged as agents.
    /// Every merge, nested ones included, records its own entry.
    ///
    /// # Errors
    /// - `MissingEntity` if a member or a referenced entity is gone
    /// - `ContainerCycle` if a merge would make the hierarchy cyclic
    pub fn merge_resources(&mut self, cluster: &Cluster<BrId>) -> Result<bool, IntegrityError> {
        let Some((survivor, absorbed)) =
            self.resolve_members(cluster.members(), Self::resolve_resource)?
        else {
            return Ok(false);
        };
        self.merge_resource_group(survivor, absorbed, cluster.shared_keys.clone(), 0)
    }

    fn merge_resource_group(
        &mut self,
        survivor: BrId,
        absorbed: Vec<BrId>,
        shared_keys: Vec<IdentifierKey>,
        depth: usize,
    ) -> Result<bool, IntegrityError> {
        if absorbed.is_empty() {
            return Ok(false);
        }
        if depth > MAX_CONTAINER_DEPTH {
            return Err(IntegrityError::ContainerCycle { resource: survivor });
        }

        let mut record = MergeRecord {
            shared_keys,
            ..MergeRecord::default()
        };
        record.snapshot.capture(self.graph, survivor.into());
        let mut followups = Followups::default();

        for member in absorbed {
            let member = self.resolve_resource(member)?;
            if member == survivor {
                continue;
            }
            self.absorb_resource(survivor, member, &mut record, &mut followups)?;
        }
        if self.graph.has_container_cycle(survivor) {
            return Err(IntegrityError::ContainerCycle { resource: survivor });
        }
        if record.absorbed.is_empty() {
            return Ok(false);
        }
        self.commit_merge(survivor.into(), record)?;

        for (a, b) in followups.containers {
            let (a, b) = (self.resolve_resource(a)?, self.resolve_resource(b)?);
            if a == b {
                continue;
            }
            let (keep, drop) = (a.min(b), a.max(b));
            let keys: Vec<IdentifierKey> = self
                .graph
                .keys_of(keep.into())
                .intersection(&self.graph.keys_of(drop.into()))
                .cloned()
                .collect();
            debug!(survivor = %keep, absorbed = %drop, "merging containers");
            self.merge_resource_group(keep, vec![drop], keys, depth + 1)?;
        }

        for (a, b, keys) in followups.publishers {
            let (a, b) = (self.resolve_agent(a)?, self.resolve_agent(b)?);
            if a == b {
                continue;
            }
            debug!(survivor = %a.min(b), absorbed = %a.max(b), "merging publishers");
            self.merge_agent_group(a.min(b), vec![a.max(b)], keys)?;
        }
        Ok(true)
    }

    fn absorb_resource(
        &mut self,
        survivor: BrId,
        member: BrId,
        record: &mut MergeRecord,
        followups: &mut Followups,
    ) -> Result<(), IntegrityError> {
        let absorbed = self
            .graph
            .resource(member)
            .cloned()
            .ok_or(IntegrityError::MissingEntity {
                handle: member.into(),
            })?;
        record.snapshot.capture(self.graph, member.into());

        followups
            .containers
            .extend(self.container_counterparts(survivor, member));
        if let Some(pair) = self.shared_publisher(survivor, member) {
            followups.publishers.push(pair);
        }

        for ar in &absorbed.contributors {
            record.snapshot.capture(self.graph, (*ar).into());
            self.graph.role_mut(*ar)?.resource = survivor;
            self.graph.resource_mut(survivor)?.contributors.push(*ar);
            record.rewired.push((*ar).into());
        }
        self.graph.resource_mut(member)?.contributors.clear();

        self.move_identifiers(member.into(), survivor.into(), record)?;

        let adopt_container = absorbed.part_of.filter(|c| {
            *c != survivor && !self.graph.container_chain(*c).contains(&survivor)
        });
        let target = self.graph.resource_mut(survivor)?;
        target.absorb_attributes(&absorbed);
        if target.part_of.is_none() || target.part_of == Some(member) {
            target.part_of = adopt_container;
        }

        // A child that is also an ancestor of the survivor skips the absorbed
        // level instead of pointing back down at the survivor.
        let ancestors = self.graph.container_chain(survivor);
        for child in self.graph.contained_in(member) {
            if child == survivor {
                continue;
            }
            let parent = if ancestors.contains(&child) {
                absorbed.part_of
            } else {
                Some(survivor)
            };
            record.snapshot.capture(self.graph, child.into());
            self.graph.resource_mut(child)?.part_of = parent;
            record.rewired.push(child.into());
        }

        self.graph.remove_resource(member)?;
        self.redirect(absorbed.handle(), survivor.into());
        record.absorbed.push(member.into());
        self.stats.absorbed += 1;
        debug!(survivor = %survivor, absorbed = %member, "resource absorbed");
        Ok(())
    }

    /// Pair each container above `member` with the nearest unpaired container
    /// above `survivor` that has the same type tag and an agreeing title.
    fn container_counterparts(&self, survivor: BrId, member: BrId) -> Vec<(BrId, BrId)> {
        let threshold = self.config.title_similarity_threshold;
        let ours = self.graph.container_chain(survivor);
        let theirs = self.graph.container_chain(member);
        let mut used = vec![false; ours.len()];
        let mut pairs = Vec::new();

        for theirs_id in theirs {
            if theirs_id == survivor || theirs_id == member {
                continue;
            }
            let Some(their) = self.graph.resource(theirs_id) else {
                continue;
            };
            let found = ours.iter().enumerate().find(|(i, ours_id)| {
                !used[*i]
                    && self.graph.resource(**ours_id).is_some_and(|our| {
                        our.kind == their.kind
                            && titles_agree(our.title.as_deref(), their.title.as_deref(), threshold)
                    })
            });
            if let Some((i, ours_id)) = found {
                used[i] = true;
                if *ours_id != theirs_id && *ours_id != member {
                    pairs.push((*ours_id, theirs_id));
                }
            }
        }
        pairs
    }

    /// Publishers of the two resources, if they differ and share an identifier.
    fn shared_publisher(
        &self,
        survivor: BrId,
        member: BrId,
    ) -> Option<(RaId, RaId, Vec<IdentifierKey>)> {
        let ours = self.graph.publisher_of(survivor)?;
        let theirs = self.graph.publisher_of(member)?;
        if ours == theirs {
            return None;
        }
        let keys: Vec<IdentifierKey> = self
            .graph
            .keys_of(EntityHandle::Agent(ours))
            .intersection(&self.graph.keys_of(EntityHandle::Agent(theirs)))
            .cloned()
            .collect();
        (!keys.is_empty()).then_some((ours, theirs, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::entity::{BrType, RoleType};
    use crate::graph::GraphStore;
    use crate::identifier::Scheme;
    use crate::provenance::{ProvenanceLog, ProvenanceRecorder};
    use crate::validation::check_integrity;

    fn doi_cluster(survivor: BrId, absorbed: BrId) -> Cluster<BrId> {
        Cluster {
            survivor,
            absorbed: vec![absorbed],
            shared_keys: vec![IdentifierKey::new(Scheme::Doi, "10.1/x")],
        }
    }

    fn article_in(graph: &mut GraphStore, journal_title: &str, issue_title: &str) -> (BrId, BrId, BrId) {
        let journal = graph.add_resource(BrType::Journal, Some(journal_title));
        let issue = graph.add_resource(BrType::Issue, Some(issue_title));
        graph.set_container(issue, journal).unwrap();
        let article = graph.add_resource(BrType::JournalArticle, Some("On graphs"));
        graph.set_container(article, issue).unwrap();
        graph.add_identifier_to(article, Scheme::Doi, "10.1/x").unwrap();
        (article, issue, journal)
    }

    #[test]
    fn test_merge_moves_roles_and_identifiers() {
        let mut graph = GraphStore::new();
        let a = graph.add_resource(BrType::JournalArticle, None);
        let b = graph.add_resource(BrType::JournalArticle, Some("Title"));
        graph.add_identifier_to(a, Scheme::Doi, "10.1/x").unwrap();
        graph.add_identifier_to(b, Scheme::Doi, "10.1/x").unwrap();
        let issn = graph.add_identifier_to(b, Scheme::Issn, "1234-5678").unwrap();
        let ra = graph.add_agent(None);
        let ar = graph.add_role(b, ra, RoleType::Author).unwrap();

        let config = MatchConfig::default();
        let mut recorder = ProvenanceRecorder::new("tester", &ProvenanceLog::new()).unwrap();
        let mut engine = MergeEngine::new(&mut graph, &mut recorder, &config);
        assert!(engine.merge_resources(&doi_cluster(a, b)).unwrap());

        let survivor = graph.resource(a).unwrap();
        assert_eq!(survivor.contributors, vec![ar]);
        assert!(survivor.identifiers.contains(&issn));
        assert_eq!(survivor.identifiers.len(), 2);
        assert_eq!(survivor.title.as_deref(), Some("Title"));
        assert_eq!(graph.role(ar).unwrap().resource, a);
        assert!(graph.resource(b).is_none());
        check_integrity(&graph).unwrap();
    }

    #[test]
    fn test_container_cascade_reaches_journal() {
        let mut graph = GraphStore::new();
        let (a1, i1, j1) = article_in(&mut graph, "Journal of Graphs", "12");
        let (a2, i2, j2) = article_in(&mut graph, "Journal of Graphs.", "12");

        let config = MatchConfig::default();
        let mut recorder = ProvenanceRecorder::new("tester", &ProvenanceLog::new()).unwrap();
        let mut engine = MergeEngine::new(&mut graph, &mut recorder, &config);
        engine.merge_resources(&doi_cluster(a1, a2)).unwrap();
        assert_eq!(engine.stats().clusters, 3);

        assert!(graph.resource(a2).is_none());
        assert!(graph.resource(i2).is_none());
        assert!(graph.resource(j2).is_none());
        assert_eq!(graph.container_chain(a1), vec![i1, j1]);
        assert_eq!(recorder.staged().len(), 3);
        check_integrity(&graph).unwrap();
    }

    #[test]
    fn test_dissimilar_containers_are_kept_apart() {
        let mut graph = GraphStore::new();
        let (a1, i1, j1) = article_in(&mut graph, "Journal of Graphs", "12");
        let (a2, i2, j2) = article_in(&mut graph, "Cell Reports", "3");

        let config = MatchConfig::default();
        let mut recorder = ProvenanceRecorder::new("tester", &ProvenanceLog::new()).unwrap();
        let mut engine = MergeEngine::new(&mut graph, &mut recorder, &config);
        engine.merge_resources(&doi_cluster(a1, a2)).unwrap();

        for br in [i1, j1, i2, j2] {
            assert!(graph.resource(br).is_some());
        }
        assert_eq!(graph.resource(a1).unwrap().part_of, Some(i1));
        check_integrity(&graph).unwrap();
    }

    #[test]
    fn test_merging_an_ancestor_keeps_hierarchy_acyclic() {
        let mut graph = GraphStore::new();
        let article = graph.add_resource(BrType::JournalArticle, Some("On graphs"));
        let issue = graph.add_resource(BrType::Issue, Some("2"));
        let volume = graph.add_resource(BrType::Volume, Some("7"));
        let journal = graph.add_resource(BrType::Journal, Some("Graphs"));
        graph.set_container(article, issue).unwrap();
        graph.set_container(issue, volume).unwrap();
        graph.set_container(volume, journal).unwrap();

        let config = MatchConfig::default();
        let mut recorder = ProvenanceRecorder::new("tester", &ProvenanceLog::new()).unwrap();
        let mut engine = MergeEngine::new(&mut graph, &mut recorder, &config);
        assert!(engine.merge_resources(&doi_cluster(article, volume)).unwrap());

        assert!(graph.resource(volume).is_none());
        assert_eq!(graph.container_chain(article), vec![issue, journal]);
        assert!(!graph.has_container_cycle(article));
        assert!(recorder.staged()[0].rewired.contains(&EntityHandle::Resource(issue)));
        check_integrity(&graph).unwrap();
    }

    #[test]
    fn test_survivor_adopts_missing_container() {
        let mut graph = GraphStore::new();
        let a = graph.add_resource(BrType::JournalArticle, None);
        let b = graph.add_resource(BrType::JournalArticle, None);
        let issue = graph.add_resource(BrType::Issue, Some("4"));
        graph.set_container(b, issue).unwrap();

        let config = MatchConfig::default();
        let mut recorder = ProvenanceRecorder::new("tester", &ProvenanceLog::new()).unwrap();
        let mut engine = MergeEngine::new(&mut graph, &mut recorder, &config);
        engine.merge_resources(&doi_cluster(a, b)).unwrap();

        assert_eq!(graph.resource(a).unwrap().part_of, Some(issue));
    }

    #[test]
    fn test_children_of_absorbed_resource_are_reparented() {
        let mut graph = GraphStore::new();
        let j1 = graph.add_resource(BrType::Journal, Some("Nature"));
        let j2 = graph.add_resource(BrType::Journal, Some("Nature"));
        let issue = graph.add_resource(BrType::Issue, Some("7"));
        graph.set_container(issue, j2).unwrap();

        let config = MatchConfig::default();
        let mut recorder = ProvenanceRecorder::new("tester", &ProvenanceLog::new()).unwrap();
        let mut engine = MergeEngine::new(&mut graph, &mut recorder, &config);
        engine.merge_resources(&doi_cluster(j1, j2)).unwrap();

        assert_eq!(graph.resource(issue).unwrap().part_of, Some(j1));
        assert!(recorder.staged()[0].rewired.contains(&EntityHandle::Resource(issue)));
    }

    #[test]
    fn test_publishers_sharing_identifier_are_merged() {
        let mut graph = GraphStore::new();
        let a = graph.add_resource(BrType::JournalArticle, None);
        let b = graph.add_resource(BrType::JournalArticle, None);
        let p1 = graph.add_agent(Some("Elsevier"));
        let p2 = graph.add_agent(Some("Elsevier BV"));
        graph.add_role(a, p1, RoleType::Publisher).unwrap();
        graph.add_role(b, p2, RoleType::Publisher).unwrap();
        graph.add_identifier_to(p1, Scheme::Crossref, "78").unwrap();
        graph.add_identifier_to(p2, Scheme::Crossref, "78").unwrap();

        let config = MatchConfig::default();
        let mut recorder = ProvenanceRecorder::new("tester", &ProvenanceLog::new()).unwrap();
        let mut engine = MergeEngine::new(&mut graph, &mut recorder, &config);
        engine.merge_resources(&doi_cluster(a, b)).unwrap();

        assert!(graph.agent(p2).is_none());
        assert_eq!(graph.publisher_of(a), Some(p1));
        assert_eq!(graph.resource(a).unwrap().contributors.len(), 1);
        let kinds: Vec<_> = recorder.staged().iter().map(|e| e.entity_kind).collect();
        assert_eq!(
            kinds,
            vec![crate::entity::EntityKind::Resource, crate::entity::EntityKind::Agent]
        );
        check_integrity(&graph).unwrap();
    }

    #[test]
    fn test_publishers_without_shared_identifier_stay_distinct() {
        let mut graph = GraphStore::new();
        let a = graph.add_resource(BrType::JournalArticle, None);
        let b = graph.add_resource(BrType::JournalArticle, None);
        let p1 = graph.add_agent(Some("Springer"));
        let p2 = graph.add_agent(Some("Wiley"));
        graph.add_role(a, p1, RoleType::Publisher).unwrap();
        graph.add_role(b, p2, RoleType::Publisher).unwrap();

        let config = MatchConfig::default();
        let mut recorder = ProvenanceRecorder::new("tester", &ProvenanceLog::new()).unwrap();
        let mut engine = MergeEngine::new(&mut graph, &mut recorder, &config);
        engine.merge_resources(&doi_cluster(a, b)).unwrap();

        assert!(graph.agent(p1).is_some());
        assert!(graph.agent(p2).is_some());
        assert_eq!(recorder.staged().len(), 1);
    }
}
