//! Provenance of structural changes.
//!
//! Every merge and every orphan deletion produces one immutable
//! [`ProvenanceEntry`]. Entries are first staged in a [`ProvenanceRecorder`]
//! while a phase runs on its working copy, and are appended to the committed
//! [`ProvenanceLog`] only when the phase commits. A failed phase therefore
//! leaves no trace in the log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{
    AgentRole, BibliographicResource, EntityHandle, EntityKind, ResponsibleAgent,
};
use crate::error::{IntegrityError, ValidationError};
use crate::graph::GraphStore;
use crate::identifier::{Identifier, IdentifierKey};

/// Maximum number of survivor hops followed by [`ProvenanceLog::resolve`].
pub const MAX_REDIRECT_HOPS: usize = 128;

/// Stable identifier for a provenance entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvenanceId(uuid::Uuid);

impl ProvenanceId {
    /// Creates a new random provenance ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ProvenanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProvenanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Absorbed entities were collapsed into a survivor.
    Merge,
    /// An entity was removed without a survivor (orphan sweep).
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Pre-change copies of every entity an operation touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeSnapshot {
    /// Resources as they were before the change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<BibliographicResource>,
    /// Roles as they were before the change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<AgentRole>,
    /// Agents as they were before the change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<ResponsibleAgent>,
    /// Identifier objects as they were before the change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<Identifier>,
}

impl MergeSnapshot {
    /// Copy the current state of `handle` unless it was captured already.
    ///
    /// The first capture wins, so callers snapshot before they mutate.
    pub fn capture(&mut self, graph: &GraphStore, handle: EntityHandle) {
        if self.contains(handle) {
            return;
        }
        match handle {
            EntityHandle::Resource(id) => {
                if let Some(br) = graph.resource(id) {
                    self.resources.push(br.clone());
                }
            }
            EntityHandle::Role(id) => {
                if let Some(ar) = graph.role(id) {
                    self.roles.push(ar.clone());
                }
            }
            EntityHandle::Agent(id) => {
                if let Some(ra) = graph.agent(id) {
                    self.agents.push(ra.clone());
                }
            }
            EntityHandle::Identifier(id) => {
                if let Some(identifier) = graph.identifier(id) {
                    self.identifiers.push(identifier.clone());
                }
            }
        }
    }

    /// Returns true if the snapshot holds a copy of `handle`.
    #[must_use]
    pub fn contains(&self, handle: EntityHandle) -> bool {
        match handle {
            EntityHandle::Resource(id) => self.resources.iter().any(|r| r.id == id),
            EntityHandle::Role(id) => self.roles.iter().any(|r| r.id == id),
            EntityHandle::Agent(id) => self.agents.iter().any(|r| r.id == id),
            EntityHandle::Identifier(id) => self.identifiers.iter().any(|r| r.id == id),
        }
    }

    /// Number of captured entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len() + self.roles.len() + self.agents.len() + self.identifiers.len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One immutable record of a structural change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    /// Stable id of this entry.
    pub id: ProvenanceId,

    /// Position in the committed log, starting at 1.
    pub sequence: u64,

    /// Merge or delete.
    pub operation: OperationKind,

    /// Kind of the entities involved.
    pub entity_kind: EntityKind,

    /// Entity that absorbed the others; `None` for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survivor: Option<EntityHandle>,

    /// Entities collapsed into the survivor, or the deleted entity.
    pub absorbed: Vec<EntityHandle>,

    /// Entities removed as a consequence (collapsed roles, dropped identifiers).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cascaded: Vec<EntityHandle>,

    /// Entities whose references were rewritten to the survivor.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rewired: Vec<EntityHandle>,

    /// Identifier keys that linked the merged entities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_keys: Vec<IdentifierKey>,

    /// When the change was recorded.
    pub recorded_at: DateTime<Utc>,

    /// Responsible agent of the change (an IRI or free-form name).
    pub attribution: String,

    /// Copies of the touched entities taken before the change.
    pub snapshot: MergeSnapshot,
}

impl ProvenanceEntry {
    /// Returns true if `handle` appears as survivor, absorbed or cascaded.
    #[must_use]
    pub fn mentions(&self, handle: EntityHandle) -> bool {
        self.survivor == Some(handle)
            || self.absorbed.contains(&handle)
            || self.cascaded.contains(&handle)
    }
}

/// The facts of one merge, before it is stamped into an entry.
#[derive(Debug, Clone, Default)]
pub struct MergeRecord {
    /// Entities collapsed into the survivor.
    pub absorbed: Vec<EntityHandle>,
    /// Entities removed as a consequence.
    pub cascaded: Vec<EntityHandle>,
    /// Entities whose references were rewritten.
    pub rewired: Vec<EntityHandle>,
    /// Keys that linked the merged entities.
    pub shared_keys: Vec<IdentifierKey>,
    /// Pre-change copies.
    pub snapshot: MergeSnapshot,
}

/// Staging area for the entries produced by one phase.
#[derive(Debug, Clone)]
pub struct ProvenanceRecorder {
    attribution: String,
    next_sequence: u64,
    staged: Vec<ProvenanceEntry>,
}

impl ProvenanceRecorder {
    /// Start staging entries that will follow `log` once committed.
    ///
    /// # Errors
    /// - `MissingField` if `attribution` is blank
    pub fn new(attribution: impl Into<String>, log: &ProvenanceLog) -> Result<Self, ValidationError> {
        let attribution = attribution.into();
        let trimmed = attribution.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingField {
                field: "attribution".to_string(),
            });
        }
        Ok(Self {
            attribution: trimmed.to_string(),
            next_sequence: log.next_sequence(),
            staged: Vec::new(),
        })
    }

    /// Stage a merge of `record.absorbed` into `survivor`.
    ///
    /// # Errors
    /// - `SelfMerge` if the survivor is among the absorbed handles
    /// - `InvalidEntity` if nothing was absorbed
    pub fn record_merge(
        &mut self,
        survivor: EntityHandle,
        record: MergeRecord,
    ) -> Result<&ProvenanceEntry, IntegrityError> {
        if record.absorbed.contains(&survivor) {
            return Err(IntegrityError::SelfMerge { handle: survivor });
        }
        if record.absorbed.is_empty() {
            return Err(IntegrityError::InvalidEntity {
                handle: survivor,
                reason: "merge without absorbed entities".to_string(),
            });
        }
        let entry = ProvenanceEntry {
            id: ProvenanceId::new(),
            sequence: self.next_sequence,
            operation: OperationKind::Merge,
            entity_kind: survivor.kind(),
            survivor: Some(survivor),
            absorbed: record.absorbed,
            cascaded: record.cascaded,
            rewired: record.rewired,
            shared_keys: record.shared_keys,
            recorded_at: Utc::now(),
            attribution: self.attribution.clone(),
            snapshot: record.snapshot,
        };
        Ok(self.push(entry))
    }

    /// Stage the deletion of an entity that has no survivor, together with
    /// the entities removed along with it.
    pub fn record_delete(
        &mut self,
        removed: EntityHandle,
        cascaded: Vec<EntityHandle>,
        snapshot: MergeSnapshot,
    ) -> &ProvenanceEntry {
        let entry = ProvenanceEntry {
            id: ProvenanceId::new(),
            sequence: self.next_sequence,
            operation: OperationKind::Delete,
            entity_kind: removed.kind(),
            survivor: None,
            absorbed: vec![removed],
            cascaded,
            rewired: Vec::new(),
            shared_keys: Vec::new(),
            recorded_at: Utc::now(),
            attribution: self.attribution.clone(),
            snapshot,
        };
        self.push(entry)
    }

    fn push(&mut self, entry: ProvenanceEntry) -> &ProvenanceEntry {
        self.next_sequence += 1;
        self.staged.push(entry);
        let last = self.staged.len() - 1;
        &self.staged[last]
    }

    /// Entries staged so far.
    #[must_use]
    pub fn staged(&self) -> &[ProvenanceEntry] {
        &self.staged
    }

    /// Number of staged entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Returns true if nothing was staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Consume the recorder, yielding the staged entries in order.
    #[must_use]
    pub fn into_entries(self) -> Vec<ProvenanceEntry> {
        self.staged
    }
}

/// Committed, append-only provenance log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceLog {
    entries: Vec<ProvenanceEntry>,
}

impl ProvenanceLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All committed entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[ProvenanceEntry] {
        &self.entries
    }

    /// Number of committed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry was committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence number the next committed entry will carry.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.entries.last().map_or(1, |e| e.sequence + 1)
    }

    /// Entries mentioning `handle`, oldest first.
    pub fn for_entity(&self, handle: EntityHandle) -> impl Iterator<Item = &ProvenanceEntry> {
        self.entries.iter().filter(move |e| e.mentions(handle))
    }

    /// Follow merge records from `handle` to the entity that now stands for it.
    ///
    /// Returns `Ok(None)` if the chain ends in a deletion.
    ///
    /// # Errors
    /// - `RedirectLoop` if the chain exceeds [`MAX_REDIRECT_HOPS`]
    pub fn resolve(&self, handle: EntityHandle) -> Result<Option<EntityHandle>, IntegrityError> {
        let mut current = handle;
        for _ in 0..MAX_REDIRECT_HOPS {
            let absorbed_by = self
                .entries
                .iter()
                .find(|e| e.absorbed.contains(&current) || e.cascaded.contains(&current));
            match absorbed_by {
                None => return Ok(Some(current)),
                Some(entry) => match (entry.operation, entry.survivor) {
                    (OperationKind::Merge, Some(survivor)) if !entry.cascaded.contains(&current) => {
                        current = survivor;
                    }
                    _ => return Ok(None),
                },
            }
        }
        Err(IntegrityError::RedirectLoop { handle })
    }

    /// Append the entries of a committed phase.
    pub(crate) fn extend(&mut self, entries: Vec<ProvenanceEntry>) {
        self.entries.extend(entries);
    }
}
