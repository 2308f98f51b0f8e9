//! Block store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagelog_storage::{Block, BlockStore, FileBlockStore, InMemoryBlockStore};
use tempfile::TempDir;

/// Create deterministic data of given size.
fn page_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Benchmark appending pages to an in-memory block.
fn bench_inmemory_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_write");

    for size in [1024, 4096, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let store = InMemoryBlockStore::new();
            let block = store.create_block(0).unwrap();
            let data = page_data(size);
            let mut position = 0u64;

            b.iter(|| {
                block.write(black_box(position), black_box(&data)).unwrap();
                position = (position + size as u64) % (64 << 20);
            });
        });
    }

    group.finish();
}

/// Benchmark appending pages to a file block.
fn bench_file_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_write");
    group.sample_size(50);

    for size in [1024, 4096, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let store = FileBlockStore::open(temp_dir.path()).unwrap();
            let block = store.create_block(0).unwrap();
            let data = page_data(size);
            let mut position = 0u64;

            b.iter(|| {
                block.write(black_box(position), black_box(&data)).unwrap();
                position = (position + size as u64) % (64 << 20);
            });
        });
    }

    group.finish();
}

/// Benchmark reading pages back from a file block.
fn bench_file_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_read");
    group.sample_size(50);

    let page_size = 4096usize;
    let pages = 256u64;
    let temp_dir = TempDir::new().unwrap();
    let store = FileBlockStore::open(temp_dir.path()).unwrap();
    let block = store.create_block(0).unwrap();
    let data = page_data(page_size);
    for page in 0..pages {
        block.write(page * page_size as u64, &data).unwrap();
    }
    block.sync().unwrap();

    group.throughput(Throughput::Bytes(page_size as u64));
    group.bench_function("page_4k", |b| {
        let mut buf = vec![0u8; page_size];
        let mut page = 0u64;
        b.iter(|| {
            let n = block.read(black_box(page * page_size as u64), &mut buf).unwrap();
            page = (page * 7 + 1) % pages;
            black_box(n);
        });
    });

    group.finish();
}

/// Benchmark file syncs after a page write.
fn bench_file_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_sync");
    group.sample_size(20);

    let temp_dir = TempDir::new().unwrap();
    let store = FileBlockStore::open(temp_dir.path()).unwrap();
    let block = store.create_block(0).unwrap();
    let data = page_data(4096);
    let mut position = 0u64;

    group.bench_function("after_4kb_write", |b| {
        b.iter(|| {
            block.write(position, &data).unwrap();
            block.sync().unwrap();
            position = (position + 4096) % (16 << 20);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_inmemory_write,
    bench_file_write,
    bench_file_read,
    bench_file_sync,
);

criterion_main!(benches);
