//! In-memory entity graph.
//!
//! `GraphStore` keeps each entity kind in its own ordered arena keyed by a
//! stable handle. Relations are handle fields; reverse relations (roles held
//! by an agent, owners of an identifier, resources contained in a resource)
//! are computed by scanning, so they can never go stale.
//!
//! Construction goes through the `add_*` and `attach_*` methods, which enforce
//! the structural invariants at insertion time. Removal is crate-private: only
//! the merge engine destroys entities, and always after rewriting every
//! reference that pointed at them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entity::{
    AgentRole, ArId, BibliographicResource, BrId, BrType, EntityHandle, IdentifierId, Mergeable,
    RaId, ResponsibleAgent, RoleType,
};
use crate::error::{IntegrityError, ValidationError};
use crate::identifier::{Identifier, IdentifierKey, Scheme};

/// Upper bound on container-chain walks; a longer chain is treated as a cycle.
pub const MAX_CONTAINER_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct HandleCounters {
    resource: u64,
    role: u64,
    agent: u64,
    identifier: u64,
}

/// The whole bibliographic graph, materialized in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStore {
    resources: BTreeMap<BrId, BibliographicResource>,
    roles: BTreeMap<ArId, AgentRole>,
    agents: BTreeMap<RaId, ResponsibleAgent>,
    identifiers: BTreeMap<IdentifierId, Identifier>,
    counters: HandleCounters,
}

/// Serializable image of a [`GraphStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphImage {
    /// Resources in handle order.
    pub resources: Vec<BibliographicResource>,
    /// Roles in handle order.
    pub roles: Vec<AgentRole>,
    /// Agents in handle order.
    pub agents: Vec<ResponsibleAgent>,
    /// Identifier objects in handle order.
    pub identifiers: Vec<Identifier>,
    counters: HandleCounters,
}

impl GraphStore {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- creation -----------------------------------------------------------

    /// Create a free-standing identifier object.
    ///
    /// The identifier takes part in matching once it is attached to an owner.
    pub fn add_identifier(
        &mut self,
        scheme: Scheme,
        literal: impl Into<String>,
    ) -> Result<IdentifierId, ValidationError> {
        let literal = literal.into();
        let literal = literal.trim();
        if literal.is_empty() {
            return Err(ValidationError::MissingField {
                field: "literal".to_string(),
            });
        }
        self.counters.identifier += 1;
        let id = IdentifierId::from_raw(self.counters.identifier);
        self.identifiers.insert(
            id,
            Identifier {
                id,
                scheme,
                literal: literal.to_string(),
            },
        );
        Ok(id)
    }

    /// Create a responsible agent.
    pub fn add_agent(&mut self, name: Option<&str>) -> RaId {
        self.counters.agent += 1;
        let id = RaId::from_raw(self.counters.agent);
        self.agents.insert(
            id,
            ResponsibleAgent {
                id,
                name: name.map(str::to_string),
                identifiers: Vec::new(),
            },
        );
        id
    }

    /// Create a bibliographic resource.
    pub fn add_resource(&mut self, kind: BrType, title: Option<&str>) -> BrId {
        self.counters.resource += 1;
        let id = BrId::from_raw(self.counters.resource);
        self.resources.insert(
            id,
            BibliographicResource {
                id,
                kind,
                title: title.map(str::to_string),
                contributors: Vec::new(),
                identifiers: Vec::new(),
                part_of: None,
            },
        );
        id
    }

    /// Create an agent role linking `agent` to `resource`.
    ///
    /// # Errors
    /// - `DanglingReference` if either end does not exist
    pub fn add_role(
        &mut self,
        resource: BrId,
        agent: RaId,
        role: RoleType,
    ) -> Result<ArId, ValidationError> {
        self.counters.role += 1;
        let id = ArId::from_raw(self.counters.role);
        if !self.agents.contains_key(&agent) {
            return Err(ValidationError::DanglingReference {
                from: id.into(),
                to: agent.into(),
            });
        }
        let Some(br) = self.resources.get_mut(&resource) else {
            return Err(ValidationError::DanglingReference {
                from: id.into(),
                to: resource.into(),
            });
        };
        br.contributors.push(id);
        self.roles.insert(
            id,
            AgentRole {
                id,
                role,
                held_by: agent,
                resource,
                identifiers: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Create an identifier and attach it to `owner` in one step.
    pub fn add_identifier_to(
        &mut self,
        owner: impl Into<EntityHandle>,
        scheme: Scheme,
        literal: impl Into<String>,
    ) -> Result<IdentifierId, ValidationError> {
        let owner = owner.into();
        if !self.contains(owner) {
            return Err(ValidationError::DanglingReference {
                from: owner,
                to: owner,
            });
        }
        let id = self.add_identifier(scheme, literal)?;
        self.attach_identifier(owner, id)?;
        Ok(id)
    }

    /// Attach an existing identifier object to an owner.
    ///
    /// # Errors
    /// - `DanglingReference` if the owner or the identifier does not exist
    /// - `DuplicateOwnership` if the owner already holds this identifier
    /// - `InvalidField` if the owner is itself an identifier
    pub fn attach_identifier(
        &mut self,
        owner: impl Into<EntityHandle>,
        identifier: IdentifierId,
    ) -> Result<(), ValidationError> {
        let owner = owner.into();
        if !self.identifiers.contains_key(&identifier) {
            return Err(ValidationError::DanglingReference {
                from: owner,
                to: identifier.into(),
            });
        }
        let list = match owner {
            EntityHandle::Resource(id) => self.resources.get_mut(&id).map(Mergeable::identifiers_mut),
            EntityHandle::Role(id) => self.roles.get_mut(&id).map(Mergeable::identifiers_mut),
            EntityHandle::Agent(id) => self.agents.get_mut(&id).map(Mergeable::identifiers_mut),
            EntityHandle::Identifier(_) => {
                return Err(ValidationError::InvalidField {
                    field: "owner".to_string(),
                    reason: "identifiers cannot own identifiers".to_string(),
                })
            }
        };
        let Some(list) = list else {
            return Err(ValidationError::DanglingReference {
                from: identifier.into(),
                to: owner,
            });
        };
        if list.contains(&identifier) {
            return Err(ValidationError::DuplicateOwnership {
                owner,
                identifier: identifier.into(),
            });
        }
        list.push(identifier);
        Ok(())
    }

    /// Set the container of `resource`.
    ///
    /// # Errors
    /// - `DanglingReference` if either resource does not exist
    /// - `ContainerCycle` if the link would make the hierarchy cyclic
    pub fn set_container(&mut self, resource: BrId, container: BrId) -> Result<(), ValidationError> {
        if !self.resources.contains_key(&container) {
            return Err(ValidationError::DanglingReference {
                from: resource.into(),
                to: container.into(),
            });
        }
        if container == resource || self.container_chain(container).contains(&resource) {
            return Err(ValidationError::ContainerCycle { resource });
        }
        let br = self
            .resources
            .get_mut(&resource)
            .ok_or(ValidationError::DanglingReference {
                from: container.into(),
                to: resource.into(),
            })?;
        br.part_of = Some(container);
        Ok(())
    }

    // --- lookup -------------------------------------------------------------

    /// Get a resource by handle.
    #[must_use]
    pub fn resource(&self, id: BrId) -> Option<&BibliographicResource> {
        self.resources.get(&id)
    }

    /// Get a role by handle.
    #[must_use]
    pub fn role(&self, id: ArId) -> Option<&AgentRole> {
        self.roles.get(&id)
    }

    /// Get an agent by handle.
    #[must_use]
    pub fn agent(&self, id: RaId) -> Option<&ResponsibleAgent> {
        self.agents.get(&id)
    }

    /// Get an identifier object by handle.
    #[must_use]
    pub fn identifier(&self, id: IdentifierId) -> Option<&Identifier> {
        self.identifiers.get(&id)
    }

    /// Returns true if the handle points at a live entity.
    #[must_use]
    pub fn contains(&self, handle: EntityHandle) -> bool {
        match handle {
            EntityHandle::Resource(id) => self.resources.contains_key(&id),
            EntityHandle::Role(id) => self.roles.contains_key(&id),
            EntityHandle::Agent(id) => self.agents.contains_key(&id),
            EntityHandle::Identifier(id) => self.identifiers.contains_key(&id),
        }
    }

    /// Iterate resources in creation order.
    pub fn resources(&self) -> impl Iterator<Item = &BibliographicResource> {
        self.resources.values()
    }

    /// Iterate roles in creation order.
    pub fn roles(&self) -> impl Iterator<Item = &AgentRole> {
        self.roles.values()
    }

    /// Iterate agents in creation order.
    pub fn agents(&self) -> impl Iterator<Item = &ResponsibleAgent> {
        self.agents.values()
    }

    /// Iterate identifier objects in creation order.
    pub fn identifiers(&self) -> impl Iterator<Item = &Identifier> {
        self.identifiers.values()
    }

    /// Number of live resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Number of live roles.
    #[must_use]
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Number of live identifier objects.
    #[must_use]
    pub fn identifier_count(&self) -> usize {
        self.identifiers.len()
    }

    /// Identifier handles owned by an entity (empty for unknown handles).
    #[must_use]
    pub fn identifiers_of(&self, owner: EntityHandle) -> &[IdentifierId] {
        let list = match owner {
            EntityHandle::Resource(id) => self.resources.get(&id).map(Mergeable::identifiers),
            EntityHandle::Role(id) => self.roles.get(&id).map(Mergeable::identifiers),
            EntityHandle::Agent(id) => self.agents.get(&id).map(Mergeable::identifiers),
            EntityHandle::Identifier(_) => None,
        };
        list.unwrap_or(&[])
    }

    /// Matching keys of the identifiers owned by an entity.
    #[must_use]
    pub fn keys_of(&self, owner: EntityHandle) -> BTreeSet<IdentifierKey> {
        self.identifiers_of(owner)
            .iter()
            .filter_map(|id| self.identifiers.get(id))
            .map(Identifier::key)
            .collect()
    }

    // --- reverse lookups ----------------------------------------------------

    /// Roles held by an agent (derived, in creation order).
    #[must_use]
    pub fn roles_held_by(&self, agent: RaId) -> Vec<ArId> {
        self.roles
            .values()
            .filter(|ar| ar.held_by == agent)
            .map(|ar| ar.id)
            .collect()
    }

    /// Every agent with the set of roles referencing it, in one scan.
    #[must_use]
    pub fn roles_by_agent(&self) -> BTreeMap<RaId, Vec<ArId>> {
        let mut out: BTreeMap<RaId, Vec<ArId>> = BTreeMap::new();
        for ar in self.roles.values() {
            out.entry(ar.held_by).or_default().push(ar.id);
        }
        out
    }

    /// Entities that own the given identifier object.
    #[must_use]
    pub fn owners_of(&self, identifier: IdentifierId) -> Vec<EntityHandle> {
        let mut owners = Vec::new();
        owners.extend(
            self.resources
                .values()
                .filter(|r| r.identifiers.contains(&identifier))
                .map(|r| EntityHandle::Resource(r.id)),
        );
        owners.extend(
            self.roles
                .values()
                .filter(|r| r.identifiers.contains(&identifier))
                .map(|r| EntityHandle::Role(r.id)),
        );
        owners.extend(
            self.agents
                .values()
                .filter(|r| r.identifiers.contains(&identifier))
                .map(|r| EntityHandle::Agent(r.id)),
        );
        owners
    }

    /// Resources whose container is `container`.
    #[must_use]
    pub fn contained_in(&self, container: BrId) -> Vec<BrId> {
        self.resources
            .values()
            .filter(|r| r.part_of == Some(container))
            .map(|r| r.id)
            .collect()
    }

    /// The chain of containers above `resource`, nearest first.
    ///
    /// The walk stops at [`MAX_CONTAINER_DEPTH`] or at the first repeated
    /// resource, so it terminates even on a corrupted hierarchy.
    #[must_use]
    pub fn container_chain(&self, resource: BrId) -> Vec<BrId> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::from([resource]);
        let mut current = self.resources.get(&resource).and_then(|r| r.part_of);
        while let Some(next) = current {
            if chain.len() >= MAX_CONTAINER_DEPTH || !seen.insert(next) {
                break;
            }
            chain.push(next);
            current = self.resources.get(&next).and_then(|r| r.part_of);
        }
        chain
    }

    /// Returns true if following `part_of` from `resource` revisits a resource.
    #[must_use]
    pub fn has_container_cycle(&self, resource: BrId) -> bool {
        let mut seen = BTreeSet::from([resource]);
        let mut current = self.resources.get(&resource).and_then(|r| r.part_of);
        let mut hops = 0usize;
        while let Some(next) = current {
            hops += 1;
            if hops > MAX_CONTAINER_DEPTH || !seen.insert(next) {
                return true;
            }
            current = self.resources.get(&next).and_then(|r| r.part_of);
        }
        false
    }

    /// The publisher of a resource: the agent held by its first publisher role.
    #[must_use]
    pub fn publisher_of(&self, resource: BrId) -> Option<RaId> {
        self.publisher_role_of(resource)
            .and_then(|ar| self.roles.get(&ar))
            .map(|ar| ar.held_by)
    }

    /// The first role on `resource` with role type publisher.
    #[must_use]
    pub fn publisher_role_of(&self, resource: BrId) -> Option<ArId> {
        let br = self.resources.get(&resource)?;
        br.contributors
            .iter()
            .copied()
            .find(|ar| {
                self.roles
                    .get(ar)
                    .is_some_and(|role| role.role == RoleType::Publisher)
            })
    }

    // --- mutation (merge engine only) --------------------------------------

    pub(crate) fn resource_mut(&mut self, id: BrId) -> Result<&mut BibliographicResource, IntegrityError> {
        self.resources
            .get_mut(&id)
            .ok_or(IntegrityError::MissingEntity { handle: id.into() })
    }

    pub(crate) fn role_mut(&mut self, id: ArId) -> Result<&mut AgentRole, IntegrityError> {
        self.roles
            .get_mut(&id)
            .ok_or(IntegrityError::MissingEntity { handle: id.into() })
    }

    pub(crate) fn agent_mut(&mut self, id: RaId) -> Result<&mut ResponsibleAgent, IntegrityError> {
        self.agents
            .get_mut(&id)
            .ok_or(IntegrityError::MissingEntity { handle: id.into() })
    }

    pub(crate) fn identifiers_of_mut(
        &mut self,
        owner: EntityHandle,
    ) -> Result<&mut Vec<IdentifierId>, IntegrityError> {
        match owner {
            EntityHandle::Resource(id) => Ok(self.resource_mut(id)?.identifiers_mut()),
            EntityHandle::Role(id) => Ok(self.role_mut(id)?.identifiers_mut()),
            EntityHandle::Agent(id) => Ok(self.agent_mut(id)?.identifiers_mut()),
            EntityHandle::Identifier(_) => Err(IntegrityError::MissingEntity { handle: owner }),
        }
    }

    pub(crate) fn remove_resource(&mut self, id: BrId) -> Result<BibliographicResource, IntegrityError> {
        self.resources
            .remove(&id)
            .ok_or(IntegrityError::MissingEntity { handle: id.into() })
    }

    pub(crate) fn remove_role(&mut self, id: ArId) -> Result<AgentRole, IntegrityError> {
        self.roles
            .remove(&id)
            .ok_or(IntegrityError::MissingEntity { handle: id.into() })
    }

    pub(crate) fn remove_agent(&mut self, id: RaId) -> Result<ResponsibleAgent, IntegrityError> {
        self.agents
            .remove(&id)
            .ok_or(IntegrityError::MissingEntity { handle: id.into() })
    }

    pub(crate) fn remove_identifier(&mut self, id: IdentifierId) -> Result<Identifier, IntegrityError> {
        self.identifiers
            .remove(&id)
            .ok_or(IntegrityError::MissingEntity { handle: id.into() })
    }

    /// Remove a resource together with the roles it owns.
    ///
    /// This is the removal path of upstream collaborators (an import that
    /// retracts a record). Resources contained in the removed one lose their
    /// container link; identifiers left without an owner are dropped.
    ///
    /// # Errors
    /// - `MissingEntity` if the resource does not exist
    pub fn retract_resource(&mut self, id: BrId) -> Result<BibliographicResource, IntegrityError> {
        for child in self.contained_in(id) {
            self.resource_mut(child)?.part_of = None;
        }
        let br = self.remove_resource(id)?;
        let mut released: Vec<IdentifierId> = br.identifiers.clone();
        for ar in &br.contributors {
            let role = self.remove_role(*ar)?;
            released.extend(role.identifiers);
        }
        for identifier in released {
            if self.owners_of(identifier).is_empty() {
                self.remove_identifier(identifier)?;
            }
        }
        Ok(br)
    }

    // --- images -------------------------------------------------------------

    /// Build a serializable image of the graph.
    #[must_use]
    pub fn to_image(&self) -> GraphImage {
        GraphImage {
            resources: self.resources.values().cloned().collect(),
            roles: self.roles.values().cloned().collect(),
            agents: self.agents.values().cloned().collect(),
            identifiers: self.identifiers.values().cloned().collect(),
            counters: self.counters,
        }
    }

    /// Rebuild a graph from an image.
    ///
    /// Handles are kept as-is; the creation counters never move backwards,
    /// so entities added later still sort after every restored one.
    #[must_use]
    pub fn from_image(image: GraphImage) -> Self {
        let mut counters = image.counters;
        let resources: BTreeMap<BrId, BibliographicResource> =
            image.resources.into_iter().map(|r| (r.id, r)).collect();
        let roles: BTreeMap<ArId, AgentRole> = image.roles.into_iter().map(|r| (r.id, r)).collect();
        let agents: BTreeMap<RaId, ResponsibleAgent> =
            image.agents.into_iter().map(|r| (r.id, r)).collect();
        let identifiers: BTreeMap<IdentifierId, Identifier> =
            image.identifiers.into_iter().map(|i| (i.id, i)).collect();

        counters.resource = counters
            .resource
            .max(resources.keys().next_back().map_or(0, |id| id.raw()));
        counters.role = counters
            .role
            .max(roles.keys().next_back().map_or(0, |id| id.raw()));
        counters.agent = counters
            .agent
            .max(agents.keys().next_back().map_or(0, |id| id.raw()));
        counters.identifier = counters
            .identifier
            .max(identifiers.keys().next_back().map_or(0, |id| id.raw()));

        Self {
            resources,
            roles,
            agents,
            identifiers,
            counters,
        }
    }
}
