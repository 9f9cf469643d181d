//! # Snapshot Pipeline Benchmark
//!
//! Delta creation and compression for a busy 64-player world, the work done
//! per client on every snapshot tick.
//!
//! Run with: `cargo bench --package snapnet_networking`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use snapnet_networking::snapshot::{
    apply_delta, create_delta, DeltaCodec, ItemSizes, Lz4Codec, SnapItem, Snapshot, VarIntCodec,
};

/// Players in the benchmark world.
const PLAYERS: i32 = 64;

/// Words per character item.
const CHARACTER_WORDS: usize = 22;

fn sizes() -> ItemSizes {
    let mut sizes = ItemSizes::new();
    sizes.set(1, 3);
    sizes.set(2, CHARACTER_WORDS);
    sizes
}

/// A world where every character moved by `tick` units.
fn world(tick: i32) -> Snapshot {
    let mut items = Vec::new();
    for id in 0..PLAYERS {
        items.push(SnapItem::new(1, id, vec![id, tick / 50, 30]));
        let mut character = vec![0; CHARACTER_WORDS];
        character[0] = tick;
        character[1] = id * 32 + tick % 7;
        character[2] = id;
        items.push(SnapItem::new(2, id, character));
    }
    Snapshot::from_items(items)
}

/// Benchmark: delta between consecutive ticks.
fn bench_create_delta(c: &mut Criterion) {
    let sizes = sizes();
    let from = world(100);
    let to = world(102);
    c.bench_function("snapshot_create_delta", |b| {
        b.iter(|| black_box(create_delta(black_box(&from), black_box(&to), &sizes)));
    });
}

/// Benchmark: delta against the empty snapshot, the recovery path.
fn bench_full_delta(c: &mut Criterion) {
    let sizes = sizes();
    let empty = Snapshot::empty();
    let to = world(102);
    c.bench_function("snapshot_full_delta", |b| {
        b.iter(|| black_box(create_delta(&empty, black_box(&to), &sizes)));
    });
}

/// Benchmark: client side reconstruction.
fn bench_apply_delta(c: &mut Criterion) {
    let sizes = sizes();
    let from = world(100);
    let delta = create_delta(&from, &world(102), &sizes);
    c.bench_function("snapshot_apply_delta", |b| {
        b.iter(|| black_box(apply_delta(&from, black_box(&delta), &sizes)));
    });
}

/// Benchmark: both codecs on the same delta.
fn bench_codecs(c: &mut Criterion) {
    let sizes = sizes();
    let delta = create_delta(&Snapshot::empty(), &world(102), &sizes);
    let varint = VarIntCodec;
    let lz4 = Lz4Codec;

    c.bench_function("codec_varint_compress", |b| {
        b.iter(|| black_box(varint.compress(black_box(&delta))));
    });
    c.bench_function("codec_lz4_compress", |b| {
        b.iter(|| black_box(lz4.compress(black_box(&delta))));
    });
}

criterion_group!(
    benches,
    bench_create_delta,
    bench_full_delta,
    bench_apply_delta,
    bench_codecs
);
criterion_main!(benches);
