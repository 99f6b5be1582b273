//! # bibmatch - Instance deduplication for bibliographic knowledge graphs
//!
//! bibmatch collapses duplicate entities in a bibliographic graph whose
//! members are transitively linked by shared identifiers, and records every
//! merge in an auditable provenance log.
//!
//! ## Core Concepts
//!
//! - **Bibliographic resource (BR)**: an article, issue, volume, journal, book
//! - **Responsible agent (RA)**: a person or organization
//! - **Agent role (AR)**: the link between a BR and the RA acting on it
//! - **Identifier**: a `(scheme, literal)` pair such as `(doi, "10.1/x")`
//! - **Cluster**: entities linked by shared identifiers, merged into the
//!   member with the lowest handle
//!
//! A run matches agents, then resources, then identifier objects, and finally
//! saves the graph and the provenance log together.
//!
//! ## Usage
//!
//! ```rust
//! use bibmatch::{BrType, GraphStore, InMemorySnapshotStore, InstanceMatcher, MatchConfig, Scheme};
//!
//! let mut graph = GraphStore::new();
//! let a = graph.add_resource(BrType::JournalArticle, Some("A paper"));
//! let b = graph.add_resource(BrType::JournalArticle, Some("A paper"));
//! graph.add_identifier_to(a, Scheme::Doi, "10.1/x")?;
//! graph.add_identifier_to(b, Scheme::Doi, "10.1/x")?;
//!
//! let mut matcher = InstanceMatcher::new(graph, MatchConfig::default())?;
//! matcher.run(&InMemorySnapshotStore::new())?;
//! assert_eq!(matcher.graph().resource_count(), 1);
//! # Ok::<(), bibmatch::MatchError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod entity;
pub mod error;
pub mod graph;
pub mod identifier;
pub mod validation;

// Matching
pub mod cluster;
pub mod config;
pub mod index;
pub mod matcher;
pub mod merge;
pub mod provenance;
pub mod similarity;

// Collaborators and persistence
pub mod enrichment;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use cluster::{Cluster, ClusterBuilder};
pub use config::MatchConfig;
pub use entity::{
	AgentRole, ArId, BibliographicResource, BrId, BrType, EntityHandle, EntityKind, IdentifierId,
	Mergeable, RaId, ResponsibleAgent, RoleType,
};
pub use error::{IntegrityError, MatchError, MatchResult, PersistenceError, ValidationError};
pub use graph::{GraphImage, GraphStore};
pub use identifier::{Identifier, IdentifierKey, Scheme};
pub use index::IdentifierIndex;
pub use matcher::{InstanceMatcher, Phase, PhaseReport, PipelineState, RunReport};
pub use merge::{MergeEngine, MergeStats};
pub use provenance::{
	MergeSnapshot, OperationKind, ProvenanceEntry, ProvenanceId, ProvenanceLog, ProvenanceRecorder,
};

// Collaborator and storage re-exports
pub use enrichment::{enrich, EnrichmentReport, IdentifierLookup, LookupError};
pub use storage::{
	FileSnapshotStore, InMemorySnapshotStore, PersistentConfig, Snapshot, SnapshotStore,
};
