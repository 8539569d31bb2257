//! Property tests for CRDT convergence (P1) and merge idempotence (P2).

use lattice_crdt::{Crdt, HybridTimestamp, LwwMap, OrSet, PeerId};
use proptest::prelude::*;

fn ts(wall: i64, counter: u32, peer: &str) -> HybridTimestamp {
    HybridTimestamp::new(wall, counter, &PeerId::new(peer))
}

#[derive(Debug, Clone)]
enum SetOp {
    Add(u8, i64, u32),
    Remove(u8, i64, u32),
}

fn set_op_strategy() -> impl Strategy<Value = SetOp> {
    prop_oneof![
        (0u8..5, 0i64..1000, 0u32..10).prop_map(|(v, w, c)| SetOp::Add(v, w, c)),
        (0u8..5, 0i64..1000, 0u32..10).prop_map(|(v, w, c)| SetOp::Remove(v, w, c)),
    ]
}

fn apply_ops(ops: &[SetOp], peer: &str) -> OrSet<u8> {
    let mut s = OrSet::new();
    for op in ops {
        match op {
            SetOp::Add(v, w, c) => {
                s.add(*v, ts(*w, *c, peer));
            }
            SetOp::Remove(v, w, c) => {
                s.remove(v, ts(*w, *c, peer));
            }
        }
    }
    s
}

proptest! {
    /// P1: two delivery permutations (here, two independently-built
    /// same-peer replicas of the same op stream, merged pairwise in
    /// different groupings) converge to the same materialized value.
    #[test]
    fn orset_merge_order_independent(ops in prop::collection::vec(set_op_strategy(), 0..30)) {
        let full = apply_ops(&ops, "p1");

        let mid = ops.len() / 2;
        let mut left = apply_ops(&ops[..mid], "p1");
        let right = apply_ops(&ops[mid..], "p1");
        left.merge(&right);

        prop_assert_eq!(full.value(), left.value());
    }

    /// P2: merging a state into itself is a no-op.
    #[test]
    fn orset_merge_idempotent(ops in prop::collection::vec(set_op_strategy(), 0..30)) {
        let mut s = apply_ops(&ops, "p1");
        let snapshot = s.clone();
        s.merge(&snapshot);
        prop_assert_eq!(s.value(), snapshot.value());
    }

    /// P2 for LwwMap as well, across a couple of keys.
    #[test]
    fn lwwmap_merge_idempotent(writes in prop::collection::vec((0u8..3, 0i32..100, 0i64..1000), 0..20)) {
        let mut m: LwwMap<u8, i32> = LwwMap::new();
        for (k, v, w) in writes {
            m.insert(k, v, ts(w, 0, "p1"));
        }
        let snapshot = m.clone();
        m.merge(&snapshot);
        prop_assert_eq!(m.value(), snapshot.value());
    }

    /// Merge is commutative for LwwMap: merging A into B gives the same
    /// result as merging B into A.
    #[test]
    fn lwwmap_merge_commutative(
        a_writes in prop::collection::vec((0u8..3, 0i32..100, 0i64..1000), 0..15),
        b_writes in prop::collection::vec((0u8..3, 0i32..100, 0i64..1000), 0..15),
    ) {
        let mut a: LwwMap<u8, i32> = LwwMap::new();
        for (k, v, w) in &a_writes {
            a.insert(*k, *v, ts(*w, 0, "p1"));
        }
        let mut b: LwwMap<u8, i32> = LwwMap::new();
        for (k, v, w) in &b_writes {
            b.insert(*k, *v, ts(*w, 0, "p2"));
        }

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        prop_assert_eq!(ab.value(), ba.value());
    }
}
