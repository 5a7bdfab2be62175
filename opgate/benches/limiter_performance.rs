use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use opgate::{LimiterConfig, MemoryCache, OperationStore, StorageBackend, TokenBucketLimiter};
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;

fn limiter_config(bucket_capacity: u32) -> LimiterConfig {
    LimiterConfig {
        requests_per_minute: 600,
        bucket_capacity,
        enabled: true,
        storage_backend: StorageBackend::Memory,
    }
}

fn benchmark_limiter(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("token_bucket_limiter");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(10));

    // Bucket large enough that every call is admitted and written back
    group.bench_function("single_key_allowed", |b| {
        let limiter =
            TokenBucketLimiter::new(MemoryCache::new(), limiter_config(u32::MAX)).unwrap();
        let now = SystemTime::now();

        b.iter(|| {
            let outcome = rt.block_on(limiter.allow_at(black_box("10.0.0.1"), now));
            black_box(outcome.allowed)
        });
    });

    // Drained bucket: read only, no write
    group.bench_function("single_key_rejected", |b| {
        let limiter = TokenBucketLimiter::new(MemoryCache::new(), limiter_config(1)).unwrap();
        let now = SystemTime::now();
        rt.block_on(limiter.allow_at("10.0.0.1", now));

        b.iter(|| {
            let outcome = rt.block_on(limiter.allow_at(black_box("10.0.0.1"), now));
            black_box(outcome.allowed)
        });
    });

    group.bench_function("many_keys", |b| {
        let cache = MemoryCache::builder().capacity(10_000).build();
        let limiter = TokenBucketLimiter::new(cache, limiter_config(100)).unwrap();
        let keys: Vec<String> = (0..10_000).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
        let mut counter = 0usize;

        b.iter(|| {
            let key = &keys[counter % keys.len()];
            counter += 1;
            let outcome = rt.block_on(limiter.allow(black_box(key)));
            black_box(outcome.remaining)
        });
    });

    group.bench_function("disabled", |b| {
        let limiter = TokenBucketLimiter::new(
            MemoryCache::new(),
            LimiterConfig {
                enabled: false,
                ..limiter_config(10)
            },
        )
        .unwrap();

        b.iter(|| {
            let outcome = rt.block_on(limiter.allow(black_box("10.0.0.1")));
            black_box(outcome.allowed)
        });
    });

    group.finish();
}

fn benchmark_operation_store(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("operation_store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("create_operation", |b| {
        let store = OperationStore::new(Arc::new(MemoryCache::new()), Duration::from_secs(3600));
        let files = vec!["before.pdf".to_string(), "after.pdf".to_string()];
        let mut counter = 0u64;

        b.iter(|| {
            counter += 1;
            let key = format!("batch-{counter}");
            let created = rt.block_on(store.create_operation(&key, files.clone()));
            black_box(created.is_ok())
        });
    });

    group.bench_function("get_operation", |b| {
        let store = OperationStore::new(Arc::new(MemoryCache::new()), Duration::from_secs(3600));
        let created = rt
            .block_on(store.create_operation("batch", vec!["a.pdf".into(), "b.pdf".into()]))
            .unwrap();

        b.iter(|| {
            let record = rt.block_on(store.get_operation(black_box(&created.operation_id)));
            black_box(record.is_ok())
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_limiter, benchmark_operation_store);
criterion_main!(benches);
