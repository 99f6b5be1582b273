use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use bibmatch::{
    BrType, GraphStore, InMemorySnapshotStore, InstanceMatcher, MatchConfig, RoleType, Scheme,
};

/// A graph where every resource and agent has one duplicate.
///
/// `n` pairs of articles share a DOI; each article has an author, and the two
/// authors of a pair share an ORCID. Every tenth pair also hangs off a pair of
/// duplicated issues so container reconciliation is measured too.
fn duplicated_graph(n: usize) -> GraphStore {
    let mut graph = GraphStore::new();
    for i in 0..n {
        let doi = format!("10.1000/{i}");
        let orcid = format!("0000-0000-{i:04}");
        let mut articles = Vec::with_capacity(2);
        for _ in 0..2 {
            let br = graph.add_resource(BrType::JournalArticle, Some(&format!("Paper {i}")));
            let ra = graph.add_agent(Some(&format!("Author {i}")));
            graph.add_role(br, ra, RoleType::Author).unwrap();
            graph.add_identifier_to(br, Scheme::Doi, doi.as_str()).unwrap();
            graph.add_identifier_to(ra, Scheme::Orcid, orcid.as_str()).unwrap();
            articles.push(br);
        }
        if i % 10 == 0 {
            for br in articles {
                let issue = graph.add_resource(BrType::Issue, Some(&format!("Issue {}", i / 10)));
                graph.set_container(br, issue).unwrap();
            }
        }
    }
    graph
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("matching/pipeline");
    for n in [100usize, 1_000] {
        let graph = duplicated_graph(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("pairs_{n}"), |b| {
            b.iter_batched(
                || graph.clone(),
                |graph| {
                    let store = InMemorySnapshotStore::new();
                    let mut matcher = InstanceMatcher::new(graph, MatchConfig::default()).unwrap();
                    black_box(matcher.run(&store).unwrap())
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_agent_phase(c: &mut Criterion) {
    let graph = duplicated_graph(1_000);
    c.bench_function("matching/agents_1000", |b| {
        b.iter_batched(
            || InstanceMatcher::new(graph.clone(), MatchConfig::default()).unwrap(),
            |mut matcher| black_box(matcher.match_agents().unwrap()),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_full_pipeline, bench_agent_phase);
criterion_main!(benches);
