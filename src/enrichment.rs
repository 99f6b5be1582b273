//! Additive identifier enrichment from external catalogs.
//!
//! The catalogs themselves (DOI and ISSN registries, ORCID, VIAF, Wikidata)
//! sit behind [`IdentifierLookup`]. [`enrich`] only ever appends identifiers
//! an entity does not already carry, so the order in which entities are
//! enriched does not matter. A failed lookup skips that one entity.

use thiserror::Error;
use tracing::{debug, warn};

use crate::entity::{BibliographicResource, BrId, EntityHandle, ResponsibleAgent};
use crate::graph::GraphStore;
use crate::identifier::{Identifier, IdentifierKey};

/// Failure of one external lookup. Never fatal to a run.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The service could not be reached or answered with an error.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        /// Name of the catalog.
        service: String,
        /// Description of the failure.
        message: String,
    },

    /// The service refused the request for now.
    #[error("{service} rate limit exceeded")]
    RateLimited {
        /// Name of the catalog.
        service: String,
    },

    /// The answer could not be interpreted.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the problem.
        message: String,
    },
}

/// Source of identifiers for resources and agents.
pub trait IdentifierLookup {
    /// Identifiers known externally for `resource`, given the ones it carries.
    ///
    /// # Errors
    /// Any [`LookupError`]; the resource is skipped.
    fn lookup_resource(
        &self,
        resource: &BibliographicResource,
        known: &[Identifier],
    ) -> Result<Vec<IdentifierKey>, LookupError>;

    /// Identifiers known externally for `agent` in its role on `resource`.
    ///
    /// # Errors
    /// Any [`LookupError`]; the agent is skipped for this resource.
    fn lookup_agent(
        &self,
        agent: &ResponsibleAgent,
        resource: &BibliographicResource,
        known: &[Identifier],
    ) -> Result<Vec<IdentifierKey>, LookupError>;
}

/// Outcome of an [`enrich`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    /// Resources handed to the lookup.
    pub resources_queried: usize,
    /// Agent lookups made (one per role).
    pub agents_queried: usize,
    /// Identifiers attached.
    pub added: usize,
    /// Returned identifiers dropped: already carried, unrecognized scheme or
    /// blank literal.
    pub skipped: usize,
    /// Lookups that failed.
    pub failed: usize,
}

/// Attach externally known identifiers to resources and their agents.
///
/// Issues and volumes are not looked up; catalogs do not identify them.
pub fn enrich(graph: &mut GraphStore, lookup: &dyn IdentifierLookup) -> EnrichmentReport {
    let mut report = EnrichmentReport::default();
    let targets: Vec<BrId> = graph
        .resources()
        .filter(|br| !br.kind.is_periodical_part())
        .map(|br| br.id)
        .collect();

    for br in targets {
        let Some(resource) = graph.resource(br).cloned() else {
            continue;
        };

        report.resources_queried += 1;
        let known = known_identifiers(graph, br.into());
        match lookup.lookup_resource(&resource, &known) {
            Ok(keys) => attach(graph, br.into(), keys, &mut report),
            Err(err) => {
                warn!(resource = %br, error = %err, "resource lookup failed");
                report.failed += 1;
            }
        }

        for ar in &resource.contributors {
            let Some(ra) = graph.role(*ar).map(|role| role.held_by) else {
                continue;
            };
            let Some(agent) = graph.agent(ra).cloned() else {
                continue;
            };
            report.agents_queried += 1;
            let known = known_identifiers(graph, ra.into());
            match lookup.lookup_agent(&agent, &resource, &known) {
                Ok(keys) => attach(graph, ra.into(), keys, &mut report),
                Err(err) => {
                    warn!(agent = %ra, resource = %br, error = %err, "agent lookup failed");
                    report.failed += 1;
                }
            }
        }
    }

    debug!(
        added = report.added,
        skipped = report.skipped,
        failed = report.failed,
        "enrichment finished"
    );
    report
}

fn known_identifiers(graph: &GraphStore, owner: EntityHandle) -> Vec<Identifier> {
    graph
        .identifiers_of(owner)
        .iter()
        .filter_map(|id| graph.identifier(*id).cloned())
        .collect()
}

fn attach(graph: &mut GraphStore, owner: EntityHandle, keys: Vec<IdentifierKey>, report: &mut EnrichmentReport) {
    let mut carried = graph.keys_of(owner);
    for key in keys {
        if !key.scheme.is_recognized() || carried.contains(&key) {
            report.skipped += 1;
            continue;
        }
        match graph.add_identifier_to(owner, key.scheme.clone(), key.literal.clone()) {
            Ok(id) => {
                debug!(owner = %owner, identifier = %id, %key, "identifier attached");
                carried.insert(key);
                report.added += 1;
            }
            Err(err) => {
                debug!(owner = %owner, %key, error = %err, "identifier rejected");
                report.skipped += 1;
            }
        }
    }
}
