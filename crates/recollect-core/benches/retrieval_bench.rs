//! Retrieval core benchmarks.
//!
//! Run with: `cargo bench -p recollect-core`

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use recollect_core::bm25::{Bm25Index, Bm25SearchOptions};
use recollect_core::model::Memory;
use recollect_core::scoring::{score_five_factor, PatternSignals};

fn sample_corpus(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            format!(
                "memory entry {i} discussing agent retrieval decay scoring consolidation \
                 working memory cache triggers prediction error gate bm25 hybrid search {i}"
            )
        })
        .collect()
}

fn bench_bm25_index_build(c: &mut Criterion) {
    let docs = sample_corpus(500);
    c.bench_function("bm25_add_500_documents", |b| {
        b.iter(|| {
            let mut index = Bm25Index::new();
            for (i, doc) in docs.iter().enumerate() {
                index.add_document(i as i64, doc, None);
            }
            black_box(index.total_docs());
        })
    });
}

fn bench_bm25_search(c: &mut Criterion) {
    let docs = sample_corpus(500);
    let mut index = Bm25Index::new();
    for (i, doc) in docs.iter().enumerate() {
        index.add_document(i as i64, doc, None);
    }

    c.bench_function("bm25_search_500_documents", |b| {
        b.iter(|| {
            black_box(index.search("memory retrieval consolidation", &Bm25SearchOptions::default()));
        })
    });
}

fn bench_composite_scoring(c: &mut Criterion) {
    let memory = Memory::new(1, "bench-project", "/tmp/bench.md");
    let signals = PatternSignals::default();
    let now = Utc::now();

    c.bench_function("score_five_factor_single", |b| {
        b.iter(|| {
            black_box(score_five_factor(&memory, 72.0, &signals, now));
        })
    });
}

criterion_group!(benches, bench_bm25_index_build, bench_bm25_search, bench_composite_scoring);
criterion_main!(benches);
