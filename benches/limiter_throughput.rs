// Limiter throughput benchmarks
//
// Measures the overhead of admission for batches of trivial tasks:
// - Unconstrained concurrency (admission bookkeeping only)
// - Concurrency 1 (every task queues behind the previous one)
// - Sliding-window rate manager with a large window
//
// Usage:
//   cargo bench --bench limiter_throughput

use admission_gate::{Limiter, Quota};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use futures::future::join_all;
use std::hint::black_box;
use std::time::Duration;
use tokio::runtime::Runtime;

async fn run_batch(quota: Quota, tasks: usize) -> usize {
    let limiter = Limiter::new(quota).unwrap();
    let submissions: Vec<_> = (0..tasks)
        .map(|i| limiter.submit(move || async move { black_box(i) }))
        .collect();
    let completed = join_all(submissions)
        .await
        .into_iter()
        .filter(|r| r.is_ok())
        .count();
    limiter.cleanup().await;
    completed
}

fn bench_concurrency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrency");

    for limit in [1u32, 8, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            b.iter(|| {
                let completed = rt.block_on(run_batch(Quota::concurrency(limit), 1000));
                black_box(completed);
            });
        });
    }

    group.finish();
}

fn bench_rate_window(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("rate_window_1000", |b| {
        b.iter(|| {
            let quota = Quota::rate(1000, Duration::from_secs(60)).with_concurrency(64);
            let completed = rt.block_on(run_batch(quota, 1000));
            black_box(completed);
        });
    });
}

criterion_group!(benches, bench_concurrency, bench_rate_window);

criterion_main!(benches);
