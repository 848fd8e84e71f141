//! Cronos Benchmark Suite
//!
//! Targets on a developer laptop:
//!   vector_ingest_single ............. < 1ms
//!   vector_search_top3_from_500 ...... < 10ms
//!   graph_merge_batch_20 ............. < 2ms
//!   graph_neighbors_depth1_fanout_200  < 1ms

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use cronos_bench::{hub_edges, seeded_context, sentence, tags};
use cronos_core::vector::SearchFilter;

fn bench_vector_ingest(c: &mut Criterion) {
    let ctx = seeded_context();
    let mut i = 0;
    c.bench_function("vector_ingest_single", |b| {
        b.iter(|| {
            i += 1;
            black_box(ctx.vector().ingest(&sentence(i), tags("u1", "w1")).expect("ingest"));
        });
    });
}

fn bench_vector_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_search_top3");
    for size in [100usize, 500] {
        let ctx = seeded_context();
        for i in 0..size {
            ctx.vector().ingest(&sentence(i), tags("u1", "w1")).expect("seed");
            // Noise from another tenant that the filter must skip.
            ctx.vector().ingest(&sentence(i), tags("u2", "w1")).expect("seed");
        }
        let filter = SearchFilter::tenant("u1", "w1");
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(ctx.vector().search(black_box("who guards the castle"), &filter, 3)));
        });
    }
    group.finish();
}

fn bench_graph_merge(c: &mut Criterion) {
    let ctx = seeded_context();
    let batch = hub_edges(20);
    c.bench_function("graph_merge_batch_20", |b| {
        b.iter(|| black_box(ctx.graph().merge_edges(&batch, "w1", "u1").expect("merge")));
    });
}

fn bench_graph_neighbors(c: &mut Criterion) {
    let ctx = seeded_context();
    ctx.graph().merge_edges(&hub_edges(200), "w1", "u1").expect("seed");
    c.bench_function("graph_neighbors_depth1_fanout_200", |b| {
        b.iter(|| black_box(ctx.graph().query_neighbors(black_box("Hub"), "w1", "u1", 1, None)));
    });
}

criterion_group!(
    benches,
    bench_vector_ingest,
    bench_vector_search,
    bench_graph_merge,
    bench_graph_neighbors,
);
criterion_main!(benches);
