//! The instance matcher: phase orchestration over one graph.
//!
//! A run walks a fixed state machine:
//!
//! ```text
//! Start -> MatchRa -> MatchBr -> MatchId -> Persist -> Done
//! ```
//!
//! Each matching phase builds an [`IdentifierIndex`] for its entity kind,
//! turns it into clusters, and merges every cluster on a working copy of the
//! graph. Only when the whole phase (including the post-phase integrity
//! checks) succeeds is the copy swapped in and the staged provenance appended
//! to the log. A failed phase leaves both untouched.
//!
//! Phases can also be called one at a time. Re-running a phase with no newly
//! shared identifiers finds no clusters and changes nothing.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::{Cluster, ClusterBuilder};
use crate::config::MatchConfig;
use crate::error::{IntegrityError, MatchResult};
use crate::graph::GraphStore;
use crate::index::IdentifierIndex;
use crate::merge::{MergeEngine, MergeStats};
use crate::provenance::{ProvenanceLog, ProvenanceRecorder};
use crate::storage::{Snapshot, SnapshotStore};
use crate::validation::{check_integrity, check_no_orphan_agents, check_unique_identifiers, validate_graph};

/// A matching phase, named by the entity kind it deduplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Responsible agents, followed by the orphan sweep.
    Agents,
    /// Bibliographic resources, with container and publisher reconciliation.
    Resources,
    /// Identifier objects sharing a `(scheme, literal)` key.
    Identifiers,
}

impl Phase {
    /// All phases in pipeline order.
    pub const ALL: [Self; 3] = [Self::Agents, Self::Resources, Self::Identifiers];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Agents => "agents",
            Self::Resources => "resources",
            Self::Identifiers => "identifiers",
        })
    }
}

/// Position of a matcher in the pipeline.
///
/// The state names the last step that completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing has run yet.
    Start,
    /// The agent phase completed.
    MatchRa,
    /// The resource phase completed.
    MatchBr,
    /// The identifier phase completed.
    MatchId,
    /// The graph and log were saved.
    Persist,
    /// Terminal.
    Done,
}

impl PipelineState {
    /// The state that follows this one. `Done` is terminal.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Start => Self::MatchRa,
            Self::MatchRa => Self::MatchBr,
            Self::MatchBr => Self::MatchId,
            Self::MatchId => Self::Persist,
            Self::Persist | Self::Done => Self::Done,
        }
    }

    /// The matching phase that entering this state runs, if any.
    #[must_use]
    pub const fn phase(self) -> Option<Phase> {
        match self {
            Self::MatchRa => Some(Phase::Agents),
            Self::MatchBr => Some(Phase::Resources),
            Self::MatchId => Some(Phase::Identifiers),
            Self::Start | Self::Persist | Self::Done => None,
        }
    }

    /// Whether the pipeline has finished.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "START",
            Self::MatchRa => "MATCH_RA",
            Self::MatchBr => "MATCH_BR",
            Self::MatchId => "MATCH_ID",
            Self::Persist => "PERSIST",
            Self::Done => "DONE",
        })
    }
}

/// What one phase did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    /// The phase that ran.
    pub phase: Phase,
    /// Clusters found by the index.
    pub clusters: usize,
    /// Merges performed, cascaded container and publisher merges included.
    pub merges: usize,
    /// Entities absorbed into survivors.
    pub absorbed: usize,
    /// Entities removed as a side effect of merges.
    pub cascaded: usize,
    /// Orphan agents deleted (agent phase only).
    pub swept: usize,
    /// Provenance entries appended to the log.
    pub entries: usize,
}

impl PhaseReport {
    fn new(phase: Phase, clusters: usize, stats: MergeStats, entries: usize) -> Self {
        Self {
            phase,
            clusters,
            merges: stats.clusters,
            absorbed: stats.absorbed,
            cascaded: stats.cascaded,
            swept: stats.swept,
            entries,
        }
    }

    /// Whether the phase left the graph unchanged.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.entries == 0
    }
}

/// Reports of a full run, in phase order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// One report per matching phase that ran.
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    /// Entities absorbed across all phases.
    #[must_use]
    pub fn total_absorbed(&self) -> usize {
        self.phases.iter().map(|p| p.absorbed).sum()
    }

    /// Provenance entries appended across all phases.
    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.phases.iter().map(|p| p.entries).sum()
    }
}

/// Deduplicates one graph, phase by phase.
#[derive(Debug, Clone)]
pub struct InstanceMatcher {
    graph: GraphStore,
    log: ProvenanceLog,
    config: MatchConfig,
    state: PipelineState,
}

impl InstanceMatcher {
    /// Wrap a materialized graph.
    ///
    /// # Errors
    /// - `Validation` if `config` is out of range
    pub fn new(graph: GraphStore, config: MatchConfig) -> MatchResult<Self> {
        Self::with_log(graph, ProvenanceLog::new(), config)
    }

    /// Continue from a saved snapshot; new entries follow the saved log.
    ///
    /// # Errors
    /// - `Validation` if `config` is out of range
    pub fn from_snapshot(snapshot: Snapshot, config: MatchConfig) -> MatchResult<Self> {
        Self::with_log(snapshot.graph, snapshot.provenance, config)
    }

    fn with_log(graph: GraphStore, log: ProvenanceLog, config: MatchConfig) -> MatchResult<Self> {
        let config = config.validate()?;
        Ok(Self {
            graph,
            log,
            config,
            state: PipelineState::Start,
        })
    }

    /// The current graph.
    #[must_use]
    pub const fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Every entry committed so far.
    #[must_use]
    pub const fn provenance(&self) -> &ProvenanceLog {
        &self.log
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Last completed pipeline step.
    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// Release the graph and its provenance log.
    #[must_use]
    pub fn into_parts(self) -> (GraphStore, ProvenanceLog) {
        (self.graph, self.log)
    }

    /// Merge agents sharing identifiers, then delete agents no role holds.
    ///
    /// # Errors
    /// - `Validation` if the graph is malformed; nothing is changed
    /// - `Integrity` if a merge broke a reference; nothing is changed
    pub fn match_agents(&mut self) -> MatchResult<PhaseReport> {
        self.run_phase(Phase::Agents)
    }

    /// Merge resources sharing identifiers, with their containers and
    /// publishers.
    ///
    /// Assumes the agent phase already ran; duplicate roles are only
    /// collapsed there.
    ///
    /// # Errors
    /// As [`match_agents`](Self::match_agents).
    pub fn match_resources(&mut self) -> MatchResult<PhaseReport> {
        self.run_phase(Phase::Resources)
    }

    /// Collapse identifier objects with equal `(scheme, literal)` keys.
    ///
    /// # Errors
    /// As [`match_agents`](Self::match_agents).
    pub fn match_identifiers(&mut self) -> MatchResult<PhaseReport> {
        self.run_phase(Phase::Identifiers)
    }

    /// Run one named phase atomically.
    ///
    /// # Errors
    /// As [`match_agents`](Self::match_agents).
    #[tracing::instrument(skip_all, fields(phase = %phase))]
    pub fn run_phase(&mut self, phase: Phase) -> MatchResult<PhaseReport> {
        validate_graph(&self.graph)?;

        let mut working = self.graph.clone();
        let mut recorder = ProvenanceRecorder::new(self.config.attribution.clone(), &self.log)?;

        let (clusters, stats) = match phase {
            Phase::Agents => {
                let clusters = ClusterBuilder::build(&IdentifierIndex::for_agents(&working));
                let mut engine = MergeEngine::new(&mut working, &mut recorder, &self.config);
                merge_all(&mut engine, &clusters, |e, c| e.merge_agents(c))?;
                let swept = engine.sweep_orphan_agents()?;
                if !swept.is_empty() {
                    debug!(count = swept.len(), "swept orphan agents");
                }
                (clusters.len(), engine.stats())
            }
            Phase::Resources => {
                let clusters = ClusterBuilder::build(&IdentifierIndex::for_resources(&working));
                let mut engine = MergeEngine::new(&mut working, &mut recorder, &self.config);
                merge_all(&mut engine, &clusters, |e, c| e.merge_resources(c))?;
                (clusters.len(), engine.stats())
            }
            Phase::Identifiers => {
                let clusters = ClusterBuilder::build(&IdentifierIndex::for_identifiers(&working));
                let mut engine = MergeEngine::new(&mut working, &mut recorder, &self.config);
                merge_all(&mut engine, &clusters, |e, c| e.merge_identifiers(c))?;
                (clusters.len(), engine.stats())
            }
        };

        check_integrity(&working)?;
        match phase {
            Phase::Agents => check_no_orphan_agents(&working)?,
            Phase::Identifiers => check_unique_identifiers(&working)?,
            Phase::Resources => {}
        }

        let entries = recorder.into_entries();
        let report = PhaseReport::new(phase, clusters, stats, entries.len());
        self.graph = working;
        self.log.extend(entries);

        info!(
            clusters = report.clusters,
            merges = report.merges,
            absorbed = report.absorbed,
            cascaded = report.cascaded,
            swept = report.swept,
            entries = report.entries,
            "phase committed"
        );
        Ok(report)
    }

    /// Save the current graph and the full provenance log.
    ///
    /// # Errors
    /// - `Persistence` as reported by `store`; the previous save stays intact
    #[tracing::instrument(skip_all)]
    pub fn persist(&self, store: &dyn SnapshotStore) -> MatchResult<()> {
        store.save(&self.graph, &self.log)?;
        info!(
            resources = self.graph.resource_count(),
            agents = self.graph.agent_count(),
            entries = self.log.len(),
            "state persisted"
        );
        Ok(())
    }

    /// Advance the pipeline by one state.
    ///
    /// On error the state does not move, so the step can be retried.
    ///
    /// # Errors
    /// Whatever the step's phase or [`persist`](Self::persist) returns.
    pub fn step(&mut self, store: &dyn SnapshotStore) -> MatchResult<Option<PhaseReport>> {
        let next = self.state.next();
        let report = match next {
            PipelineState::Persist => {
                self.persist(store)?;
                None
            }
            other => match other.phase() {
                Some(phase) => Some(self.run_phase(phase)?),
                None => None,
            },
        };
        debug!(from = %self.state, to = %next, "pipeline advanced");
        self.state = next;
        Ok(report)
    }

    /// Run the remaining pipeline to `Done`.
    ///
    /// # Errors
    /// The first failing step; earlier steps stay committed.
    pub fn run(&mut self, store: &dyn SnapshotStore) -> MatchResult<RunReport> {
        let mut report = RunReport::default();
        while !self.state.is_done() {
            if let Some(phase) = self.step(store)? {
                report.phases.push(phase);
            }
        }
        info!(
            absorbed = report.total_absorbed(),
            entries = report.total_entries(),
            "pipeline done"
        );
        Ok(report)
    }
}

fn merge_all<H: Copy>(
    engine: &mut MergeEngine<'_>,
    clusters: &[Cluster<H>],
    merge: impl Fn(&mut MergeEngine<'_>, &Cluster<H>) -> Result<bool, IntegrityError>,
) -> Result<(), IntegrityError> {
    for cluster in clusters {
        merge(engine, cluster)?;
    }
    Ok(())
}
