//! Benchmarks for flowstats-distribution
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::time::Instant;

use flowstats_distribution::concurrent::{available_parallelism, Distribution};
use flowstats_distribution::quantiles::TDigest;
use flowstats_distribution::traits::{EncodableSketch, QuantileSketch};

// ============================================================================
// t-digest Benchmarks
// ============================================================================

fn bench_tdigest(c: &mut Criterion) {
    let mut group = c.benchmark_group("tdigest");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add", |b| {
        let mut digest = TDigest::new(100.0);
        let mut i = 0u64;
        b.iter(|| {
            digest.add(black_box(i as f64));
            i = i.wrapping_add(1);
        });
    });

    group.bench_function("to_bytes", |b| {
        let mut digest = TDigest::new(100.0);
        for i in 0..100_000 {
            digest.add(i as f64);
        }
        b.iter(|| black_box(digest.to_bytes()));
    });

    group.finish();
}

// ============================================================================
// Distribution Benchmarks
// ============================================================================

fn bench_distribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("distribution");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_uncontended", |b| {
        let distribution = Distribution::new();
        let mut i = 0u64;
        b.iter(|| {
            distribution.record(black_box(i as f64));
            i = i.wrapping_add(1);
        });
    });

    let threads = available_parallelism().max(2);
    group.bench_function(format!("record_{}_threads", threads), |b| {
        b.iter_custom(|iters| {
            let distribution = Distribution::new();
            let per_thread = iters / threads as u64 + 1;
            let start = Instant::now();
            std::thread::scope(|s| {
                for _ in 0..threads {
                    let distribution = &distribution;
                    s.spawn(move || {
                        for i in 0..per_thread {
                            distribution.record(i as f64);
                        }
                    });
                }
            });
            start.elapsed()
        });
    });

    group.bench_function("flush_10k", |b| {
        let distribution = Distribution::new();
        b.iter(|| {
            for i in 0..10_000 {
                distribution.record(i as f64);
            }
            black_box(distribution.flush().unwrap())
        });
    });

    group.finish();
}

// ============================================================================
// Main
// ============================================================================

criterion_group!(benches, bench_tdigest, bench_distribution);

criterion_main!(benches);
