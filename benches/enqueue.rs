use std::time::{Duration, SystemTime};

use criterion::{black_box, BatchSize, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};
use tempfile::tempdir;

use rookery::{MessageId, QueueEngine, SystemClock, TableConfig};

const ENQUEUES_PER_ITER: usize = 1_000;

fn unsynced() -> TableConfig {
    TableConfig {
        sync_writes: false,
        ..TableConfig::default()
    }
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    for &size in &[64_usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let dir = tempdir().expect("tempdir");
                    let engine = QueueEngine::open_with(dir.path(), unsynced(), SystemClock)
                        .expect("open");
                    let payload = vec![0u8; size];
                    let expiry = SystemTime::now() + Duration::from_secs(3600);
                    (dir, engine, payload, expiry)
                },
                |(_dir, engine, payload, expiry)| {
                    for _ in 0..ENQUEUES_PER_ITER {
                        engine
                            .enqueue("bench", expiry, black_box(&payload))
                            .expect("enqueue");
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("dequeue");
    group.bench_function("walk_1000", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().expect("tempdir");
                let engine =
                    QueueEngine::open_with(dir.path(), unsynced(), SystemClock).expect("open");
                let expiry = SystemTime::now() + Duration::from_secs(3600);
                for _ in 0..ENQUEUES_PER_ITER {
                    engine.enqueue("bench", expiry, &[0u8; 256]).expect("enqueue");
                }
                (dir, engine)
            },
            |(_dir, engine)| {
                let mut cursor = MessageId::MIN;
                while let Some(msg) = engine.dequeue(cursor).expect("dequeue") {
                    cursor = black_box(msg.id);
                }
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_dequeue);
criterion_main!(benches);
