use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use maat::memory::{EngineOptions, MemoryEngine};

const TOPICS: &[&str] = &["python", "garden", "family", "music", "rust", "travel"];

fn build_engine(dir: &std::path::Path, size: usize) -> MemoryEngine {
    let engine = MemoryEngine::open(dir, EngineOptions::default()).unwrap();
    for i in 0..size {
        let topic = TOPICS[i % TOPICS.len()];
        engine
            .store("user", &format!("note {i} about {topic} and other things"))
            .unwrap();
    }
    engine
}

fn bench_semantic_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("semantic_search");

    for size in [100usize, 1_000, 5_000] {
        let tmp = tempfile::tempdir().unwrap();
        let engine = build_engine(tmp.path(), size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let hits = engine.semantic().search(black_box("python things"), 5).unwrap();
                black_box(hits);
            });
        });
    }

    group.finish();
}

fn bench_fusion_recall(c: &mut Criterion) {
    let mut group = c.benchmark_group("fusion_recall");

    for size in [100usize, 1_000, 5_000] {
        let tmp = tempfile::tempdir().unwrap();
        let engine = build_engine(tmp.path(), size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let hits = engine.recall(black_box("garden"), 5).unwrap();
                black_box(hits);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_semantic_search, bench_fusion_recall);
criterion_main!(benches);
