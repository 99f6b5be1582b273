//! End-to-end tests for the matching pipeline.
//!
//! These tests drive [`InstanceMatcher`] through its public surface only:
//! build a graph, run one or all phases, then inspect graph and provenance.

use bibmatch::{
    BrType, EntityHandle, EntityKind, GraphStore, IdentifierKey, InMemorySnapshotStore,
    InstanceMatcher, MatchConfig, OperationKind, Phase, PipelineState, RoleType, Scheme,
};

fn matcher(graph: GraphStore) -> InstanceMatcher {
    InstanceMatcher::new(graph, MatchConfig::default()).unwrap()
}

/// Every reference held by a live entity, as handles.
fn all_references(graph: &GraphStore) -> Vec<EntityHandle> {
    let mut refs = Vec::new();
    for br in graph.resources() {
        refs.extend(br.contributors.iter().map(|ar| EntityHandle::from(*ar)));
        refs.extend(br.identifiers.iter().map(|id| EntityHandle::from(*id)));
        refs.extend(br.part_of.map(EntityHandle::from));
    }
    for ar in graph.roles() {
        refs.push(ar.held_by.into());
        refs.push(ar.resource.into());
        refs.extend(ar.identifiers.iter().map(|id| EntityHandle::from(*id)));
    }
    for ra in graph.agents() {
        refs.extend(ra.identifiers.iter().map(|id| EntityHandle::from(*id)));
    }
    refs
}

#[test]
fn test_resources_sharing_doi_collapse_into_one() {
    let mut graph = GraphStore::new();
    let br1 = graph.add_resource(BrType::JournalArticle, Some("On matching"));
    let br2 = graph.add_resource(BrType::JournalArticle, Some("On matching"));
    graph.add_identifier_to(br1, Scheme::Doi, "10.1/x").unwrap();
    graph.add_identifier_to(br2, Scheme::Doi, "10.1/x").unwrap();
    graph.add_identifier_to(br2, Scheme::Issn, "1234-5678").unwrap();
    let ra1 = graph.add_agent(Some("Doe, Jane"));
    let ra2 = graph.add_agent(Some("Roe, Rick"));
    let ar1 = graph.add_role(br1, ra1, RoleType::Author).unwrap();
    let ar2 = graph.add_role(br2, ra2, RoleType::Author).unwrap();

    let mut m = matcher(graph);
    let report = m.match_resources().unwrap();
    assert_eq!(report.clusters, 1);
    assert_eq!(report.absorbed, 1);

    let graph = m.graph();
    assert_eq!(graph.resource_count(), 1);
    let survivor = graph.resource(br1).unwrap();
    assert!(graph.resource(br2).is_none());

    let keys = graph.keys_of(br1.into());
    assert!(keys.contains(&IdentifierKey::new(Scheme::Doi, "10.1/x")));
    assert!(keys.contains(&IdentifierKey::new(Scheme::Issn, "1234-5678")));
    assert_eq!(survivor.identifiers.len(), 2);

    assert_eq!(survivor.contributors, vec![ar1, ar2]);
    assert_eq!(graph.role(ar2).unwrap().resource, br1);
    assert!(!all_references(graph).contains(&br2.into()));
}

#[test]
fn test_agents_sharing_orcid_collapse_into_one() {
    let mut graph = GraphStore::new();
    let br1 = graph.add_resource(BrType::JournalArticle, Some("First"));
    let br2 = graph.add_resource(BrType::JournalArticle, Some("Second"));
    let smith = graph.add_agent(Some("J. Smith"));
    let john = graph.add_agent(Some("John Smith"));
    let ar1 = graph.add_role(br1, smith, RoleType::Author).unwrap();
    let ar2 = graph.add_role(br2, john, RoleType::Author).unwrap();
    graph.add_identifier_to(smith, Scheme::Orcid, "0000-0002-1825-0097").unwrap();
    graph.add_identifier_to(john, Scheme::Orcid, "0000-0002-1825-0097").unwrap();

    let mut m = matcher(graph);
    m.match_agents().unwrap();

    let graph = m.graph();
    assert_eq!(graph.agent_count(), 1);
    assert_eq!(graph.role(ar1).unwrap().held_by, smith);
    assert_eq!(graph.role(ar2).unwrap().held_by, smith);

    let entries = m.provenance().entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.operation, OperationKind::Merge);
    assert_eq!(entry.entity_kind, EntityKind::Agent);
    assert_eq!(entry.survivor, Some(smith.into()));
    assert_eq!(entry.absorbed, vec![EntityHandle::from(john)]);
    assert_eq!(entry.attribution, bibmatch::config::DEFAULT_ATTRIBUTION);
    assert_eq!(
        entry.shared_keys,
        vec![IdentifierKey::new(Scheme::Orcid, "0000-0002-1825-0097")]
    );
}

#[test]
fn test_sweep_removes_agent_left_without_roles() {
    let mut graph = GraphStore::new();
    let kept = graph.add_resource(BrType::JournalArticle, Some("Kept"));
    let gone = graph.add_resource(BrType::JournalArticle, Some("Gone"));
    let author = graph.add_agent(Some("Author"));
    let lonely = graph.add_agent(Some("Lonely"));
    graph.add_role(kept, author, RoleType::Author).unwrap();
    graph.add_role(gone, lonely, RoleType::Author).unwrap();
    let viaf = graph.add_identifier_to(lonely, Scheme::Viaf, "V1").unwrap();

    graph.retract_resource(gone).unwrap();
    assert!(graph.agent(lonely).is_some());

    let mut m = matcher(graph);
    let report = m.match_agents().unwrap();
    assert_eq!(report.swept, 1);

    let graph = m.graph();
    assert!(graph.agent(lonely).is_none());
    assert!(graph.identifier(viaf).is_none());
    assert!(graph.agent(author).is_some());

    let entry = m.provenance().entries().last().unwrap();
    assert_eq!(entry.operation, OperationKind::Delete);
    assert_eq!(entry.survivor, None);
    assert_eq!(entry.absorbed, vec![EntityHandle::from(lonely)]);
    assert_eq!(entry.cascaded, vec![EntityHandle::from(viaf)]);
    assert!(m.provenance().resolve(lonely.into()).unwrap().is_none());
}

#[test]
fn test_agent_merge_collapses_duplicate_roles() {
    let mut graph = GraphStore::new();
    let br = graph.add_resource(BrType::JournalArticle, Some("Paper"));
    let a = graph.add_agent(Some("Smith, J."));
    let b = graph.add_agent(Some("Smith, John"));
    let kept = graph.add_role(br, a, RoleType::Author).unwrap();
    let duplicate = graph.add_role(br, b, RoleType::Author).unwrap();
    graph.add_identifier_to(a, Scheme::Orcid, "0000-0001").unwrap();
    graph.add_identifier_to(b, Scheme::Orcid, "0000-0001").unwrap();

    let mut m = matcher(graph);
    let report = m.match_agents().unwrap();
    assert_eq!(report.cascaded, 2);

    let graph = m.graph();
    assert_eq!(graph.resource(br).unwrap().contributors, vec![kept]);
    assert!(graph.role(duplicate).is_none());
    let entry = &m.provenance().entries()[0];
    assert!(entry.cascaded.contains(&duplicate.into()));
}

#[test]
fn test_resource_merge_cascades_to_similar_containers() {
    let mut graph = GraphStore::new();
    let journal1 = graph.add_resource(BrType::Journal, Some("Journal of Matching"));
    let journal2 = graph.add_resource(BrType::Journal, Some("The Journal of Matching"));
    let issue1 = graph.add_resource(BrType::Issue, Some("1"));
    let issue2 = graph.add_resource(BrType::Issue, Some("1"));
    let article1 = graph.add_resource(BrType::JournalArticle, Some("Paper"));
    let article2 = graph.add_resource(BrType::JournalArticle, Some("Paper"));
    graph.set_container(issue1, journal1).unwrap();
    graph.set_container(issue2, journal2).unwrap();
    graph.set_container(article1, issue1).unwrap();
    graph.set_container(article2, issue2).unwrap();
    graph.add_identifier_to(article1, Scheme::Doi, "10.1/p").unwrap();
    graph.add_identifier_to(article2, Scheme::Doi, "10.1/p").unwrap();

    let config = MatchConfig::default().with_title_similarity_threshold(0.7);
    let mut m = InstanceMatcher::new(graph, config).unwrap();
    let report = m.match_resources().unwrap();
    assert_eq!(report.merges, 3);

    let graph = m.graph();
    assert_eq!(graph.resource_count(), 3);
    assert_eq!(graph.container_chain(article1), vec![issue1, journal1]);
    for gone in [article2, issue2, journal2] {
        assert!(graph.resource(gone).is_none());
        assert!(!all_references(graph).contains(&gone.into()));
    }
    assert_eq!(
        m.provenance().resolve(journal2.into()).unwrap(),
        Some(journal1.into())
    );
}

#[test]
fn test_merging_resource_with_its_own_ancestor_keeps_other_merges() {
    let mut graph = GraphStore::new();
    let article = graph.add_resource(BrType::JournalArticle, Some("Paper"));
    let issue = graph.add_resource(BrType::Issue, Some("3"));
    let journal = graph.add_resource(BrType::Journal, Some("Journal of Matching"));
    graph.set_container(article, issue).unwrap();
    graph.set_container(issue, journal).unwrap();
    graph.add_identifier_to(article, Scheme::Wikidata, "Q1").unwrap();
    graph.add_identifier_to(journal, Scheme::Wikidata, "Q1").unwrap();

    let x = graph.add_resource(BrType::JournalArticle, Some("Other"));
    let y = graph.add_resource(BrType::JournalArticle, Some("Other"));
    graph.add_identifier_to(x, Scheme::Doi, "10.1/other").unwrap();
    graph.add_identifier_to(y, Scheme::Doi, "10.1/other").unwrap();

    let mut m = matcher(graph);
    let report = m.match_resources().unwrap();
    assert_eq!(report.clusters, 2);
    assert_eq!(report.absorbed, 2);

    let (graph, log) = m.into_parts();
    bibmatch::validation::check_integrity(&graph).unwrap();
    assert!(graph.resource(journal).is_none());
    assert!(graph.resource(y).is_none());
    assert_eq!(graph.container_chain(article), vec![issue]);
    assert_eq!(graph.resource(issue).unwrap().part_of, None);
    assert!(!all_references(&graph).contains(&journal.into()));
    assert_eq!(log.resolve(journal.into()).unwrap(), Some(article.into()));
}

#[test]
fn test_cluster_absorbed_by_container_cascade_is_redirected() {
    let mut graph = GraphStore::new();
    let articles: Vec<_> = (0..3)
        .map(|_| graph.add_resource(BrType::JournalArticle, Some("Paper")))
        .collect();
    let issues: Vec<_> = (0..3)
        .map(|_| graph.add_resource(BrType::Issue, Some("5")))
        .collect();
    for (article, issue) in articles.iter().zip(&issues) {
        graph.set_container(*article, *issue).unwrap();
        graph.add_identifier_to(*article, Scheme::Doi, "10.1/shared").unwrap();
        graph.add_identifier_to(*issue, Scheme::Issn, "1111-2222").unwrap();
    }

    let mut m = matcher(graph);
    let report = m.match_resources().unwrap();
    // The issue cluster was already collapsed by the article cascade.
    assert_eq!(report.clusters, 2);
    assert_eq!(report.merges, 3);
    assert_eq!(report.absorbed, 4);

    let graph = m.graph();
    assert_eq!(graph.resource_count(), 2);
    assert_eq!(graph.container_chain(articles[0]), vec![issues[0]]);
    assert_eq!(graph.identifier_count(), 2);
    for issue in &issues[1..] {
        assert_eq!(
            m.provenance().resolve((*issue).into()).unwrap(),
            Some(issues[0].into())
        );
    }
    let again = m.match_resources().unwrap();
    assert!(again.is_noop());
}

#[test]
fn test_identifier_phase_leaves_one_object_per_key() {
    let mut graph = GraphStore::new();
    let book = graph.add_resource(BrType::Book, Some("Book"));
    let chapter = graph.add_resource(BrType::BookChapter, Some("Chapter"));
    let ra = graph.add_agent(Some("Editor"));
    graph.add_role(book, ra, RoleType::Editor).unwrap();
    let first = graph.add_identifier_to(book, Scheme::Wikidata, "Q42").unwrap();
    graph.add_identifier_to(chapter, Scheme::Wikidata, "Q42").unwrap();
    graph.add_identifier_to(ra, Scheme::Wikidata, "Q42").unwrap();

    let mut m = matcher(graph);
    let report = m.match_identifiers().unwrap();
    assert_eq!(report.absorbed, 2);

    let graph = m.graph();
    assert_eq!(graph.identifier_count(), 1);
    assert_eq!(graph.identifiers_of(book.into()), &[first]);
    assert_eq!(graph.identifiers_of(chapter.into()), &[first]);
    assert_eq!(graph.identifiers_of(ra.into()), &[first]);
    assert_eq!(graph.owners_of(first).len(), 3);
}

#[test]
fn test_full_pipeline_is_idempotent() {
    let mut graph = GraphStore::new();
    let br1 = graph.add_resource(BrType::JournalArticle, Some("Paper"));
    let br2 = graph.add_resource(BrType::JournalArticle, Some("Paper"));
    let ra1 = graph.add_agent(Some("A"));
    let ra2 = graph.add_agent(Some("A."));
    graph.add_role(br1, ra1, RoleType::Author).unwrap();
    graph.add_role(br2, ra2, RoleType::Author).unwrap();
    graph.add_identifier_to(br1, Scheme::Doi, "10.1/a").unwrap();
    graph.add_identifier_to(br2, Scheme::Doi, "10.1/a").unwrap();
    graph.add_identifier_to(ra1, Scheme::Orcid, "0000-0003").unwrap();
    graph.add_identifier_to(ra2, Scheme::Orcid, "0000-0003").unwrap();

    let store = InMemorySnapshotStore::new();
    let mut m = matcher(graph);
    let report = m.run(&store).unwrap();
    assert_eq!(m.state(), PipelineState::Done);
    assert_eq!(report.total_absorbed(), 2);

    let graph = m.graph();
    assert_eq!(graph.resource_count(), 1);
    assert_eq!(graph.agent_count(), 1);
    // The two roles only meet on one resource after the resource merge,
    // which does not collapse roles.
    assert_eq!(graph.role_count(), 2);

    let before = graph.clone();
    let entries = m.provenance().len();
    for phase in Phase::ALL {
        let again = m.run_phase(phase).unwrap();
        assert_eq!(again.clusters, 0, "{phase} found new clusters");
        assert!(again.is_noop());
    }
    assert_eq!(m.graph(), &before);
    assert_eq!(m.provenance().len(), entries);
}

#[test]
fn test_provenance_sequence_is_contiguous() {
    let mut graph = GraphStore::new();
    for literal in ["10.1/a", "10.1/b"] {
        let x = graph.add_resource(BrType::JournalArticle, None);
        let y = graph.add_resource(BrType::JournalArticle, None);
        graph.add_identifier_to(x, Scheme::Doi, literal).unwrap();
        graph.add_identifier_to(y, Scheme::Doi, literal).unwrap();
    }
    let mut m = matcher(graph);
    m.run(&InMemorySnapshotStore::new()).unwrap();

    let sequences: Vec<u64> = m.provenance().entries().iter().map(|e| e.sequence).collect();
    let expected: Vec<u64> = (1..=sequences.len() as u64).collect();
    assert_eq!(sequences, expected);
}
