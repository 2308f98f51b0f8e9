//! On-disk format benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagelog_core::loggable::encode_header;
use pagelog_core::page_hash;
use pagelog_core::varint::{decode_compressed, encode_compressed};
use rand::Rng;

/// Generate random data of the specified size.
fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Benchmark compressed integer encoding.
fn bench_varint(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint");

    for value in [0u64, 300, 1 << 20, u64::MAX].iter() {
        group.bench_with_input(BenchmarkId::new("encode", value), value, |b, &value| {
            b.iter(|| encode_compressed(black_box(value)));
        });

        let encoded = encode_compressed(*value);
        group.bench_with_input(BenchmarkId::new("decode", value), &encoded, |b, encoded| {
            b.iter(|| decode_compressed(black_box(encoded)));
        });
    }

    group.finish();
}

/// Benchmark loggable header encoding.
fn bench_header(c: &mut Criterion) {
    c.bench_function("loggable_header", |b| {
        b.iter(|| encode_header(black_box(3), black_box(4711), black_box(1500)).unwrap());
    });
}

/// Benchmark the page trailer hash.
fn bench_page_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_hash");

    for size in [1024, 4096, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        let data = random_data(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| page_hash(black_box(data)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_varint, bench_header, bench_page_hash);

criterion_main!(benches);
