//! Error types for bibmatch.
//!
//! All errors are strongly typed using thiserror. Structural problems with
//! the graph are always fatal: they abort the running phase and leave the
//! committed graph untouched. Only enrichment lookup failures are ever
//! recovered, and those never reach this module (see
//! [`LookupError`](crate::enrichment::LookupError)).

use std::path::PathBuf;

use thiserror::Error;

use crate::entity::{ArId, BrId, EntityHandle, RaId};
use crate::identifier::IdentifierKey;

/// Input validation errors, detected before any mutation in a phase.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{from} references missing entity {to}")]
    DanglingReference {
        from: EntityHandle,
        to: EntityHandle,
    },

    #[error("Agent role {role} and resource {resource} do not reference each other")]
    MissingBackReference {
        role: ArId,
        resource: BrId,
    },

    #[error("Container hierarchy of {resource} contains a cycle")]
    ContainerCycle {
        resource: BrId,
    },

    #[error("{owner} owns identifier {identifier} more than once")]
    DuplicateOwnership {
        owner: EntityHandle,
        identifier: EntityHandle,
    },

    #[error("Identifier {identifier} has an empty literal")]
    EmptyLiteral {
        identifier: EntityHandle,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },
}

/// Reference-integrity violations detected during or after a merge.
///
/// These signal a defect in the merge engine and are never patched over.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Entity {handle} is missing from the graph")]
    MissingEntity {
        handle: EntityHandle,
    },

    #[error("{from} still references removed entity {to}")]
    DanglingReference {
        from: EntityHandle,
        to: EntityHandle,
    },

    #[error("Container hierarchy of {resource} contains a cycle")]
    ContainerCycle {
        resource: BrId,
    },

    #[error("Identifier {key} exists {count} times after identifier matching")]
    DuplicateIdentifier {
        key: IdentifierKey,
        count: usize,
    },

    #[error("{owner} owns identifier {identifier} more than once")]
    DuplicateOwnership {
        owner: EntityHandle,
        identifier: EntityHandle,
    },

    #[error("Entity {handle} is malformed: {reason}")]
    InvalidEntity {
        handle: EntityHandle,
        reason: String,
    },

    #[error("Agent {agent} is not referenced by any agent role")]
    OrphanAgent {
        agent: RaId,
    },

    #[error("Unexpected integrity failure: {reason}")]
    Unexpected {
        reason: String,
    },

    #[error("Cannot merge {handle} into itself")]
    SelfMerge {
        handle: EntityHandle,
    },

    #[error("Merge redirect chain starting at {handle} exceeded the hop limit")]
    RedirectLoop {
        handle: EntityHandle,
    },
}

/// Errors raised while persisting or loading the graph and provenance log.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output directory {} is locked by another process", path.display())]
    Locked {
        path: PathBuf,
    },

    #[error("Failed to encode {what}: {message}")]
    Encode {
        what: &'static str,
        message: String,
    },

    #[error("Corrupted {what}: {message}")]
    Corrupted {
        what: &'static str,
        message: String,
    },

    #[error("Snapshot backend error: {message}")]
    Backend {
        message: String,
    },

    #[error("Invalid persistence configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Top-level error type for bibmatch.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Reference integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl MatchError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a reference-integrity error.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    /// Returns true if this is a persistence error.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// Result type alias for bibmatch operations.
pub type MatchResult<T> = Result<T, MatchError>;
