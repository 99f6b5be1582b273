//! Structural checks over a [`GraphStore`].
//!
//! The same walk serves two purposes. Before a phase mutates anything,
//! [`validate_graph`] rejects malformed input with a [`ValidationError`].
//! After a phase has run on its working copy, [`check_integrity`] re-walks the
//! result and reports any broken reference as an [`IntegrityError`]; such a
//! failure means the merge engine itself is defective.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity::{EntityHandle, IdentifierId};
use crate::error::{IntegrityError, ValidationError};
use crate::graph::GraphStore;
use crate::identifier::IdentifierKey;

/// Reject graphs that break the reference rules before any mutation.
///
/// # Errors
/// Returns the first violation found, scanning resources, roles, agents and
/// identifiers in that order.
pub fn validate_graph(graph: &GraphStore) -> Result<(), ValidationError> {
    check_references(graph)
}

/// Re-check reference integrity after a phase.
///
/// # Errors
/// Returns the first dangling or malformed reference as an [`IntegrityError`].
pub fn check_integrity(graph: &GraphStore) -> Result<(), IntegrityError> {
    check_references(graph).map_err(into_integrity)
}

/// Every agent must be held by at least one role.
///
/// # Errors
/// - `OrphanAgent` for the first unreferenced agent
pub fn check_no_orphan_agents(graph: &GraphStore) -> Result<(), IntegrityError> {
    let held = graph.roles_by_agent();
    match graph.agents().find(|ra| !held.contains_key(&ra.id)) {
        Some(ra) => Err(IntegrityError::OrphanAgent { agent: ra.id }),
        None => Ok(()),
    }
}

/// At most one identifier object may exist per `(scheme, literal)` key.
///
/// # Errors
/// - `DuplicateIdentifier` for the first key held by several objects
pub fn check_unique_identifiers(graph: &GraphStore) -> Result<(), IntegrityError> {
    let mut counts: BTreeMap<IdentifierKey, usize> = BTreeMap::new();
    for identifier in graph.identifiers() {
        *counts.entry(identifier.key()).or_default() += 1;
    }
    match counts.into_iter().find(|(_, count)| *count > 1) {
        Some((key, count)) => Err(IntegrityError::DuplicateIdentifier { key, count }),
        None => Ok(()),
    }
}

fn check_references(graph: &GraphStore) -> Result<(), ValidationError> {
    for br in graph.resources() {
        let from = EntityHandle::Resource(br.id);
        for ar in &br.contributors {
            let Some(role) = graph.role(*ar) else {
                return Err(ValidationError::DanglingReference {
                    from,
                    to: (*ar).into(),
                });
            };
            if role.resource != br.id {
                return Err(ValidationError::MissingBackReference {
                    role: *ar,
                    resource: br.id,
                });
            }
        }
        if let Some(container) = br.part_of {
            if graph.resource(container).is_none() {
                return Err(ValidationError::DanglingReference {
                    from,
                    to: container.into(),
                });
            }
            if graph.has_container_cycle(br.id) {
                return Err(ValidationError::ContainerCycle { resource: br.id });
            }
        }
        check_owned_identifiers(graph, from, &br.identifiers)?;
    }

    for ar in graph.roles() {
        let from = EntityHandle::Role(ar.id);
        if graph.agent(ar.held_by).is_none() {
            return Err(ValidationError::DanglingReference {
                from,
                to: ar.held_by.into(),
            });
        }
        let Some(br) = graph.resource(ar.resource) else {
            return Err(ValidationError::DanglingReference {
                from,
                to: ar.resource.into(),
            });
        };
        if !br.contributors.contains(&ar.id) {
            return Err(ValidationError::MissingBackReference {
                role: ar.id,
                resource: ar.resource,
            });
        }
        check_owned_identifiers(graph, from, &ar.identifiers)?;
    }

    for ra in graph.agents() {
        check_owned_identifiers(graph, EntityHandle::Agent(ra.id), &ra.identifiers)?;
    }

    for identifier in graph.identifiers() {
        if identifier.literal.trim().is_empty() {
            return Err(ValidationError::EmptyLiteral {
                identifier: identifier.id.into(),
            });
        }
    }
    Ok(())
}

fn check_owned_identifiers(
    graph: &GraphStore,
    owner: EntityHandle,
    identifiers: &[IdentifierId],
) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for id in identifiers {
        if graph.identifier(*id).is_none() {
            return Err(ValidationError::DanglingReference {
                from: owner,
                to: (*id).into(),
            });
        }
        if !seen.insert(*id) {
            return Err(ValidationError::DuplicateOwnership {
                owner,
                identifier: (*id).into(),
            });
        }
    }
    Ok(())
}

fn into_integrity(err: ValidationError) -> IntegrityError {
    match err {
        ValidationError::DanglingReference { from, to } => {
            IntegrityError::DanglingReference { from, to }
        }
        ValidationError::MissingBackReference { role, resource } => {
            IntegrityError::DanglingReference {
                from: role.into(),
                to: resource.into(),
            }
        }
        ValidationError::ContainerCycle { resource } => IntegrityError::ContainerCycle { resource },
        ValidationError::DuplicateOwnership { owner, identifier } => {
            IntegrityError::DuplicateOwnership { owner, identifier }
        }
        ValidationError::EmptyLiteral { identifier } => IntegrityError::InvalidEntity {
            handle: identifier,
            reason: "empty literal".to_string(),
        },
        // Field errors come from construction, never from a graph walk.
        other @ (ValidationError::MissingField { .. } | ValidationError::InvalidField { .. }) => {
            IntegrityError::Unexpected {
                reason: other.to_string(),
            }
        }
    }
}
