use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lektrix_store::Store;

fn seeded_store(dir: &tempfile::TempDir, rows: i64) -> Store {
    let store = Store::new(dir.path().join("bench.db"));
    store.initialize().unwrap();
    for ts in 0..rows {
        store.append_at(ts, ts as f64).unwrap();
    }
    store
}

/// Benchmark a single append (the ingestor's hot path)
fn bench_append(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 0);
    let mut ts = 0;

    c.bench_function("append", |b| {
        b.iter(|| {
            store.append_at(black_box(ts), black_box(1.0)).unwrap();
            ts += 1;
        });
    });
}

/// Benchmark the renderer's trailing-window query against growing tables
fn bench_query_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_last_hour");

    // 10 s sampling: 360 rows per hour, 8640 per day.
    for rows in [360i64, 8_640, 86_400].iter() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, *rows);
        let cutoff = rows - 360;

        group.bench_with_input(BenchmarkId::from_parameter(rows), &cutoff, |b, &cutoff| {
            b.iter(|| store.query_since(black_box(cutoff)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark a full snapshot copy
fn bench_snapshot(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 8_640);
    let dest = dir.path().join("snapshot.db");

    c.bench_function("snapshot_one_day", |b| {
        b.iter(|| store.snapshot_to(black_box(&dest)).unwrap());
    });
}

criterion_group!(benches, bench_append, bench_query_window, bench_snapshot);
criterion_main!(benches);
