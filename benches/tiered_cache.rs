//! Benchmarks for the L1 cache store and the concurrency gate
//!
//! Target: 1M L1 reads/sec on a warm cache

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use provider_gateway::cache::{CacheMetrics, LruTtlStore};
use provider_gateway::ConcurrencyGate;
use std::sync::Arc;
use std::time::Duration;

fn warm_store(entries: usize) -> LruTtlStore {
    let store = LruTtlStore::new(
        entries,
        Duration::from_secs(3600),
        Arc::new(CacheMetrics::new()),
    );
    for i in 0..entries {
        store.set(
            &format!("alpha:search:{:05}", i),
            Bytes::from_static(b"{\"type\":\"search\"}"),
            None,
        );
    }
    store
}

fn bench_l1_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("l1_store");
    group.throughput(Throughput::Elements(1));

    let store = warm_store(10_000);

    group.bench_function("get_hit", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("alpha:search:{:05}", counter % 10_000);
            black_box(store.get(black_box(&key)));
        });
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| {
            black_box(store.get(black_box("alpha:search:missing")));
        });
    });

    group.finish();
}

fn bench_l1_set_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("l1_store");
    group.throughput(Throughput::Elements(1));

    let store = warm_store(1_000);
    let value = Bytes::from_static(b"{\"type\":\"item\"}");

    group.bench_function("set_evicting", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("alpha:item:{}", counter);
            black_box(store.set(black_box(&key), value.clone(), None));
        });
    });

    group.finish();
}

fn bench_gate_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrency_gate");
    group.throughput(Throughput::Elements(100));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let gate = Arc::new(ConcurrencyGate::new(8).unwrap());

    group.bench_function("100_tasks_cap_8", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for _ in 0..100 {
                    let gate = gate.clone();
                    handles.push(tokio::spawn(async move {
                        if let Ok(_permit) = gate.acquire().await {
                            tokio::task::yield_now().await;
                        }
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_l1_get,
    bench_l1_set_with_eviction,
    bench_gate_contention,
);
criterion_main!(benches);
