//! Throughput Benchmark for chronocache
//!
//! Measures the cache under various workloads, single-shard against sharded.

use bytes::Bytes;
use chronocache::storage::djb33;
use chronocache::{Cache, Ttl};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

fn cache(shards: usize) -> Cache<Bytes> {
    Cache::builder().shards(shards).build()
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    for shards in [1usize, 64] {
        let cache = cache(shards);
        group.bench_with_input(BenchmarkId::new("set_small", shards), &shards, |b, _| {
            let mut i = 0u64;
            let value = Bytes::from("small_value");
            b.iter(|| {
                cache.set(format!("key:{}", i), value.clone(), Ttl::Never);
                i += 1;
            });
        });
    }

    let cache = cache(64);
    group.bench_function("set_with_ttl", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            cache.set(
                format!("ttl:{}", i),
                value.clone(),
                Ttl::After(Duration::from_secs(3600)),
            );
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let cache = cache(64);

    // Pre-populate with data
    for i in 0..100_000 {
        cache.set(
            format!("key:{}", i),
            Bytes::from(format!("value:{}", i)),
            Ttl::Never,
        );
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(cache.get(&key));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(cache.get(&key));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let cache = cache(64);

    // Pre-populate
    for i in 0..10_000 {
        cache.set(
            format!("key:{}", i),
            Bytes::from(format!("value:{}", i)),
            Ttl::Never,
        );
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                // 20% writes
                cache.set(format!("new:{}", i), Bytes::from("value"), Ttl::Never);
            } else {
                // 80% reads
                let key = format!("key:{}", i % 10_000);
                black_box(cache.get(&key));
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark compute operations
fn bench_compute(c: &mut Criterion) {
    let counters: Cache<u64> = Cache::builder().shards(64).build();

    let mut group = c.benchmark_group("compute");
    group.throughput(Throughput::Elements(1));

    // Single counter (high contention)
    counters.set("counter", 0, Ttl::Never);
    group.bench_function("increment_single", |b| {
        b.iter(|| {
            black_box(counters.increment("counter", 1).unwrap());
        });
    });

    group.bench_function("compute", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("compute:{}", i % 1000);
            black_box(counters.compute(&key, |a, _| a.wrapping_add(1), 0));
            i += 1;
        });
    });

    for i in 0..1000 {
        counters.set(format!("src:{}", i), i, Ttl::Never);
    }
    group.bench_function("compute_two_keys", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let first = format!("src:{}", i % 1000);
            let second = format!("src:{}", (i + 1) % 1000);
            black_box(
                counters
                    .compute_two_keys(&first, &second, |x, y| x + y, "sum", Ttl::Never)
                    .unwrap(),
            );
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    for shards in [1usize, 64] {
        group.bench_with_input(
            BenchmarkId::new("4_threads_mixed", shards),
            &shards,
            |b, &shards| {
                b.iter(|| {
                    let cache = cache(shards);
                    let handles: Vec<_> = (0..4)
                        .map(|t| {
                            let cache = cache.clone();
                            thread::spawn(move || {
                                for i in 0..10_000 {
                                    let key = format!("key:{}:{}", t, i);
                                    cache.set(key.clone(), Bytes::from("value"), Ttl::Never);
                                    cache.get(&key);
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        handle.join().unwrap();
                    }

                    black_box(cache.item_count());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark expiry sweeps
fn bench_delete_expired(c: &mut Criterion) {
    let mut group = c.benchmark_group("expiry");

    group.bench_function("sweep_nothing_expired", |b| {
        let cache = cache(64);
        for i in 0..10_000 {
            cache.set(
                format!("key:{}", i),
                Bytes::from("value"),
                Ttl::After(Duration::from_secs(3600)),
            );
        }
        b.iter(|| black_box(cache.delete_expired()));
    });

    group.finish();
}

/// Benchmark shard routing
fn bench_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("route");
    group.throughput(Throughput::Elements(1));

    let key = "user:123456:session:abcdef";
    group.bench_function("djb33", |b| {
        b.iter(|| black_box(djb33(black_box(0x5eed), key.as_bytes())));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mixed,
    bench_compute,
    bench_concurrent,
    bench_delete_expired,
    bench_route,
);

criterion_main!(benches);
