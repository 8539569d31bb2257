//! Merge throughput for the CRDT primitives under realistic replica sizes:
//! convergence cost is the main per-gossip-round expense on the hot path
//! (spec §5 "CPU-heavy merges run on the worker that received the
//! message").

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lattice_crdt::{Crdt, HybridTimestamp, LwwMap, OrSet, PeerId};

fn build_lww_map(peer: &PeerId, entries: usize) -> LwwMap<String, u64> {
    let mut map = LwwMap::new();
    for i in 0..entries {
        let ts = HybridTimestamp::new(i as i64, 0, peer);
        map.insert(format!("key-{i}"), i as u64, ts);
    }
    map
}

fn build_or_set(peer: &PeerId, entries: usize) -> OrSet<u64> {
    let mut set = OrSet::new();
    for i in 0..entries {
        let ts = HybridTimestamp::new(i as i64, 0, peer);
        set.add(i as u64, ts);
    }
    set
}

fn bench_lww_map_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("lww_map_merge");
    for size in [16usize, 256, 4096] {
        let peer_a = PeerId::new("peer-a");
        let peer_b = PeerId::new("peer-b");
        let a = build_lww_map(&peer_a, size);
        let b = build_lww_map(&peer_b, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bencher, _| {
            bencher.iter(|| {
                let mut merged = a.clone();
                merged.merge(black_box(&b));
                merged
            });
        });
    }
    group.finish();
}

fn bench_or_set_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("or_set_merge");
    for size in [16usize, 256, 4096] {
        let peer_a = PeerId::new("peer-a");
        let peer_b = PeerId::new("peer-b");
        let a = build_or_set(&peer_a, size);
        let b = build_or_set(&peer_b, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bencher, _| {
            bencher.iter(|| {
                let mut merged = a.clone();
                merged.merge(black_box(&b));
                merged
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lww_map_merge, bench_or_set_merge);
criterion_main!(benches);
