//! Benchmarks for cell and row access through the tile cache.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use segment_store::segment::address::AddressTranslator;
use segment_store::{Geometry, SegmentMatrix};

const N: usize = 512;

fn open(tmp: &TempDir, name: &str, nseg: usize) -> SegmentMatrix {
    let mut seg = SegmentMatrix::open(tmp.path().join(name), N, N, 64, 64, 8, nseg).unwrap();
    let row: Vec<f64> = (0..N).map(|c| c as f64).collect();
    for r in 0..N {
        seg.put_row(r, bytemuck::cast_slice(&row)).unwrap();
    }
    seg
}

// Deterministic scatter over the matrix.
fn cells(count: usize) -> Vec<(usize, usize)> {
    let mut x = 0x2545_f491_u64;
    (0..count)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            ((x as usize) % N, ((x >> 32) as usize) % N)
        })
        .collect()
}

fn bench_translate(c: &mut Criterion) {
    let pow2 = Geometry::new(N, N, 64, 64, 8).unwrap();
    let fast = AddressTranslator::new(&pow2);
    let slow = AddressTranslator::general(&pow2);
    let points = cells(10_000);

    c.bench_function("translate_shift_10k", |b| {
        b.iter(|| {
            for &(r, col) in &points {
                black_box(fast.translate(black_box(r), black_box(col)));
            }
        })
    });
    c.bench_function("translate_divide_10k", |b| {
        b.iter(|| {
            for &(r, col) in &points {
                black_box(slow.translate(black_box(r), black_box(col)));
            }
        })
    });
}

fn bench_random_get(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let mut seg = open(&tmp, "get", 8);
    let points = cells(10_000);

    c.bench_function("random_get_10k_8_slots", |b| {
        b.iter(|| {
            for &(r, col) in &points {
                black_box(seg.get_as::<f64>(r, col).unwrap());
            }
        })
    });
    seg.close().unwrap();
}

fn bench_random_put(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let mut seg = open(&tmp, "put", 8);
    let points = cells(10_000);

    c.bench_function("random_put_10k_8_slots", |b| {
        b.iter(|| {
            for &(r, col) in &points {
                seg.put_as(r, col, &1.5f64).unwrap();
            }
        })
    });
    seg.close().unwrap();
}

fn bench_get_row(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let mut seg = open(&tmp, "row", 8);
    let mut buf = vec![0u8; N * 8];

    c.bench_function("get_row_sweep", |b| {
        b.iter(|| {
            for r in 0..N {
                seg.get_row(r, &mut buf).unwrap();
            }
            black_box(&buf);
        })
    });
    seg.close().unwrap();
}

criterion_group!(
    benches,
    bench_translate,
    bench_random_get,
    bench_random_put,
    bench_get_row,
);
criterion_main!(benches);
