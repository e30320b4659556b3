//! Arena benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use heapsim_bench::churn;
use heapsim_core::Arena;

fn bench_allocate_release_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[24, 64, 200, 520, 2000, 70000];
    let mut group = c.benchmark_group("allocate_release_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("arena", size), &size, |b, &sz| {
            let mut arena = Arena::new(1 << 20);
            b.iter(|| {
                let ptr = arena.allocate(sz).expect("top always grows");
                arena.release(criterion::black_box(ptr));
            });
        });
    }
    group.finish();
}

fn bench_allocation_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation_burst");

    group.bench_function("1000x64B", |b| {
        b.iter(|| {
            let mut arena = Arena::new(1 << 20);
            for _ in 0..1000 {
                criterion::black_box(arena.allocate(64));
            }
        });
    });

    group.finish();
}

fn bench_churn_with_consolidation(c: &mut Criterion) {
    let mut group = c.benchmark_group("churn");

    group.bench_function("2000_ops", |b| {
        b.iter(|| {
            let mut arena = Arena::new(1 << 20);
            churn(&mut arena, 0xA5A5_5A5A, 2000);
            arena.consolidate();
            criterion::black_box(arena.snapshot().chunks.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_allocate_release_cycle,
    bench_allocation_burst,
    bench_churn_with_consolidation
);
criterion_main!(benches);
