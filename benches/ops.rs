//! Operation benchmarks for propstore
//!
//! Measures the uncontended fast paths: the lock/put round-trip and the
//! create/exists pair.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use propstore::{LockMode, PropEntry, PropRequest, StoreConfig, TransientStore};
use std::sync::Arc;

fn bench_lock_put(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = TransientStore::new("bench", 4, StoreConfig::default());

    let mut group = c.benchmark_group("lock_put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("update_round_trip", |b| {
        let mut i = 0u64;
        let value = Bytes::from_static(b"value");
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            rt.block_on(async {
                let granted = store
                    .get(
                        key.clone(),
                        vec![PropRequest::new(0, LockMode::Update)],
                        0,
                        false,
                    )
                    .await
                    .unwrap();
                let lock_id = granted.props[0].lock_id;
                black_box(
                    store
                        .put(&key, &[PropEntry::new(0, lock_id, Some(value.clone()))])
                        .await,
                );
            });
            i += 1;
        });
    });

    group.bench_function("read_existing", |b| {
        let store = TransientStore::new("bench-read", 1, StoreConfig::default());
        rt.block_on(async {
            let granted = store
                .get(
                    Bytes::from_static(b"hot"),
                    vec![PropRequest::new(0, LockMode::Update)],
                    0,
                    false,
                )
                .await
                .unwrap();
            store
                .put(
                    b"hot",
                    &[PropEntry::new(
                        0,
                        granted.props[0].lock_id,
                        Some(Bytes::from_static(b"payload")),
                    )],
                )
                .await;
        });
        b.iter(|| {
            rt.block_on(async {
                let reply = store
                    .get(
                        Bytes::from_static(b"hot"),
                        vec![PropRequest::new(0, LockMode::Read)],
                        0,
                        false,
                    )
                    .await
                    .unwrap();
                black_box(reply);
            });
        });
    });

    group.finish();
}

fn bench_create_exists(c: &mut Criterion) {
    let store: Arc<TransientStore> = TransientStore::new("bench-create", 4, StoreConfig::default());

    // Pre-populate for the exists probes
    for i in 0..100_000u64 {
        store.create(Bytes::from(format!("key:{}", i)));
    }

    let mut group = c.benchmark_group("create_exists");
    group.throughput(Throughput::Elements(1));

    group.bench_function("create_new", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("fresh:{}", i));
            black_box(store.create(key));
            i += 1;
        });
    });

    group.bench_function("exists_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(store.exists(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("exists_miss", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(store.exists(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_lock_put, bench_create_exists);
criterion_main!(benches);
