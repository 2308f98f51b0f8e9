//! Log operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagelog_core::{Log, LogConfig};
use rand::Rng;
use tempfile::TempDir;

/// Generate random data of the specified size.
fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

fn config() -> LogConfig {
    LogConfig::new()
        .file_size(1024)
        .page_size(4096)
        .memory_usage(64 << 20)
}

/// Benchmark one record per session.
fn bench_single_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_write");

    for size in [64, 256, 1024, 8192].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let log = Log::open_in_memory(config()).unwrap();
            let data = random_data(size);

            b.iter(|| {
                let address = log.write(1, 0, black_box(&data)).unwrap();
                black_box(address);
            });
        });
    }
    group.finish();
}

/// Benchmark sessions of many records.
fn bench_session_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_write");

    for records in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*records as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(records),
            records,
            |b, &records| {
                let log = Log::open_in_memory(config()).unwrap();
                let data = random_data(256);

                b.iter(|| {
                    let mut session = log.begin_write().unwrap();
                    for i in 0..records {
                        session.write(1, i as u32, black_box(&data)).unwrap();
                    }
                    session.end().unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark durable sessions on disk.
fn bench_durable_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("durable_write");
    group.sample_size(20);

    let temp_dir = TempDir::new().unwrap();
    let log = Log::open_dir(temp_dir.path(), config().durable_write(true)).unwrap();
    let data = random_data(1024);

    group.throughput(Throughput::Bytes(1024));
    group.bench_function("1kb", |b| {
        b.iter(|| log.write(1, 0, black_box(&data)).unwrap());
    });
    group.finish();
}

/// Benchmark random reads with a warm and a cold cache.
fn bench_random_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_read");

    let log = Log::open_in_memory(config()).unwrap();
    let data = random_data(200);
    let addresses: Vec<u64> = (0..10_000).map(|i| log.write(1, i, &data).unwrap()).collect();

    group.bench_function("cached", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            let loggable = log.read(black_box(addresses[(idx * 7919) % addresses.len()])).unwrap();
            idx += 1;
            black_box(loggable.data().len());
        });
    });

    let small_cache = Log::open_in_memory(config().memory_usage(256 << 10)).unwrap();
    let addresses: Vec<u64> = (0..10_000)
        .map(|i| small_cache.write(1, i, &data).unwrap())
        .collect();
    group.bench_function("small_cache", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            let loggable = small_cache
                .read(black_box(addresses[(idx * 7919) % addresses.len()]))
                .unwrap();
            idx += 1;
            black_box(loggable.data().len());
        });
    });

    group.finish();
}

/// Benchmark a full scan.
fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");
    group.sample_size(20);

    for count in [1_000u32, 10_000].iter() {
        let log = Log::open_in_memory(config()).unwrap();
        let data = random_data(128);
        for i in 0..*count {
            log.write(1, i, &data).unwrap();
        }

        group.throughput(Throughput::Elements(u64::from(*count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| black_box(log.loggable_iter(0).count()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_write,
    bench_session_write,
    bench_durable_write,
    bench_random_read,
    bench_iterate,
);

criterion_main!(benches);
