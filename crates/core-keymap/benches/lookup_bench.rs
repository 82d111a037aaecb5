//! Keymap lookup benchmark: dense exact bindings plus a printable range,
//! probed with hits, range hits, and misses.

use std::hint::black_box;

use core_keymap::Keymap;
use criterion::{Criterion, criterion_group, criterion_main};

fn build_map() -> Keymap<u32> {
    let mut m = Keymap::new();
    m.add_range("Chr- ", "Chr-~", 0);
    for (i, key) in ["Enter", "Backspace", "Tab", "Esc", "Up", "Down"]
        .iter()
        .enumerate()
    {
        m.add(key, i as u32 + 1);
    }
    for i in 0..64u32 {
        m.add(&format!("doc:op-{i:02}"), 100 + i);
    }
    m
}

fn bench_lookup(c: &mut Criterion) {
    let mut map = build_map();
    c.bench_function("lookup_exact_hit", |b| {
        b.iter(|| map.lookup(black_box("doc:op-31")))
    });
    c.bench_function("lookup_range_hit", |b| {
        b.iter(|| map.lookup(black_box("Chr-q")))
    });
    c.bench_function("lookup_miss_bloom", |b| {
        b.iter(|| map.lookup(black_box("Mouse-release")))
    });
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
