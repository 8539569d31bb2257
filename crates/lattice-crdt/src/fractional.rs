//! Fractional-Index Array.
//!
//! A totally ordered sequence where positions are dense rationals: between
//! any two positions there is always an interstitial one, so insertion
//! never requires reindexing neighbors. Allocation uses the Stern-Brocot
//! mediant: given neighbors `a/b` and `c/d`, the new position is
//! `(a+c)/(b+d)`.
//!
//! Depth is unbounded: pathological repeated insertion at the same spot
//! grows numerator/denominator without limit (see Open Questions in
//! DESIGN.md). `i128` buys a very large but still finite amount of depth.

use crate::clock::HybridTimestamp;
use crate::lww::LwwRegister;
use crate::traits::{Crdt, Delta};
use std::collections::BTreeMap;

/// A dense rational position. Ordered by cross-multiplication, not by
/// reducing to a common denominator, so it stays exact for arbitrarily
/// deep mediant chains (short of overflow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Frac {
    pub num: i128,
    pub den: i128,
}

impl Frac {
    pub const fn new(num: i128, den: i128) -> Self {
        Self { num, den }
    }

    /// Sentinel used as the implicit left bound when no left neighbor
    /// exists.
    pub const LEFT_SENTINEL: Frac = Frac::new(0, 1);
    /// Sentinel used as the implicit right bound when no right neighbor
    /// exists.
    pub const RIGHT_SENTINEL: Frac = Frac::new(1, 1);

    pub fn mediant(a: &Frac, b: &Frac) -> Frac {
        Frac::new(a.num + b.num, a.den + b.den)
    }
}

impl PartialOrd for Frac {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frac {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.num * other.den).cmp(&(other.num * self.den))
    }
}

/// A CRDT sequence keyed by dense rational position. Built directly on
/// [`LwwRegister`]: each slot is an LWW register over `Option<T>`, and
/// iteration order falls out of the key's `Ord` impl for free (entries are
/// kept in a `BTreeMap`).
///
/// Keyed by `(Frac, HybridTimestamp)` rather than bare `Frac`. Two peers
/// concurrently inserting between the same neighbors compute the same
/// mediant independently of each other — there is no coordination to avoid
/// it — so the position alone cannot be a unique key without one insert
/// silently clobbering the other on merge. Folding the writer's timestamp
/// into the key lets both entries coexist; `Frac`'s `Ord` still dominates
/// the tuple comparison, so iteration order is unaffected except among
/// entries that landed on the exact same position, where the timestamp
/// (and, as its last tie-break field, the peer id) gives every replica the
/// same deterministic order.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FractionalArray<T: Clone> {
    entries: BTreeMap<(Frac, HybridTimestamp), LwwRegister<Option<T>>>,
}

impl<T: Clone> Default for FractionalArray<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: Clone> FractionalArray<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any live (non-tombstoned) entry already sits at `pos`,
    /// regardless of which writer put it there. A linear scan: racks hold a
    /// handful of resources at most, and a position can only ever collide
    /// with the small number of entries sharing its exact `Frac`.
    fn occupied(&self, pos: &Frac) -> bool {
        self.entries
            .iter()
            .any(|((p, _), reg)| p == pos && reg.get().is_some())
    }

    /// Insert `value` between `left` and `right` (either may be absent, in
    /// which case the fixed sentinel is used). If the mediant position is
    /// already occupied by a live (non-tombstoned) entry, the mediant is
    /// recomputed between the candidate and `right`, walking right until a
    /// free slot is found — matching the resource model's
    /// `attach_to_rack` hint-taken policy.
    ///
    /// This walk only avoids collisions this replica already knows about.
    /// Two replicas that haven't yet exchanged deltas can still compute the
    /// identical candidate independently; that's fine, because the slot is
    /// keyed by `(candidate, ts)` rather than `candidate` alone, so both
    /// inserts survive the eventual merge instead of one clobbering the
    /// other.
    pub fn insert_between(
        &mut self,
        left: Option<&Frac>,
        right: Option<&Frac>,
        value: T,
        ts: HybridTimestamp,
    ) -> Frac {
        let left_bound = left.copied().unwrap_or(Frac::LEFT_SENTINEL);
        let mut right_bound = right.copied().unwrap_or(Frac::RIGHT_SENTINEL);
        let mut candidate = Frac::mediant(&left_bound, &right_bound);
        while self.occupied(&candidate) {
            right_bound = candidate;
            candidate = Frac::mediant(&left_bound, &right_bound);
        }
        self.entries
            .insert((candidate, ts.clone()), LwwRegister::new(Some(value), ts));
        candidate
    }

    /// Tombstone every live entry at `pos`. Ordinarily there is exactly one;
    /// if concurrent inserts collided on the same position there may be
    /// several, and removing "the" element at `pos` tombstones all of them.
    /// A no-op if nothing live sits there.
    pub fn remove(&mut self, pos: &Frac, ts: HybridTimestamp) {
        let keys: Vec<(Frac, HybridTimestamp)> = self
            .entries
            .iter()
            .filter(|((p, _), reg)| p == pos && reg.get().is_some())
            .map(|(k, _)| k.clone())
            .collect();
        if keys.is_empty() {
            self.entries.insert((*pos, ts.clone()), LwwRegister::new(None, ts));
            return;
        }
        for key in keys {
            if let Some(reg) = self.entries.get_mut(&key) {
                reg.update(None, ts.clone());
            }
        }
    }

    /// Neighbors (previous, next) live positions surrounding `pos`, used by
    /// callers that want to insert next to an existing element. Comparisons
    /// are on the `Frac` component alone, so entries sharing `pos` with
    /// `pos` itself (a collided insert) are never reported as their own
    /// neighbor.
    pub fn neighbors_of(&self, pos: &Frac) -> (Option<Frac>, Option<Frac>) {
        let prev = self
            .entries
            .iter()
            .rev()
            .find(|((p, _), reg)| p < pos && reg.get().is_some())
            .map(|((p, _), _)| *p);
        let next = self
            .entries
            .iter()
            .find(|((p, _), reg)| p > pos && reg.get().is_some())
            .map(|((p, _), _)| *p);
        (prev, next)
    }

    /// The last live position, if any — the natural left neighbor for an
    /// append.
    pub fn last(&self) -> Option<Frac> {
        self.entries
            .iter()
            .rev()
            .find(|(_, reg)| reg.get().is_some())
            .map(|((p, _), _)| *p)
    }

    /// Live entries in position order. Entries that collided on the same
    /// `Frac` (concurrent inserts between the same neighbors) appear
    /// adjacent, ordered by the timestamp half of the key — the same order
    /// on every replica that has merged the same set of inserts.
    pub fn ordered(&self) -> Vec<(Frac, T)> {
        self.entries
            .iter()
            .filter_map(|((p, _), reg)| reg.get().clone().map(|v| (*p, v)))
            .collect()
    }

    /// The most recent write timestamp across every slot (including
    /// tombstones), or `None` if empty.
    pub fn latest_timestamp(&self) -> Option<HybridTimestamp> {
        self.entries.values().map(|reg| reg.timestamp().clone()).max()
    }
}

impl<T: Clone> Crdt for FractionalArray<T> {
    type Value = Vec<T>;

    fn merge(&mut self, other: &Self) {
        for (key, reg) in &other.entries {
            match self.entries.get_mut(key) {
                Some(existing) => existing.merge(reg),
                None => {
                    self.entries.insert(key.clone(), reg.clone());
                }
            }
        }
    }

    fn value(&self) -> Vec<T> {
        self.ordered().into_iter().map(|(_, v)| v).collect()
    }
}

impl<T: Clone> Delta for FractionalArray<T> {
    type Op = (Frac, HybridTimestamp, LwwRegister<Option<T>>);

    fn apply(&mut self, op: Self::Op) {
        let (pos, key_ts, reg) = op;
        let key = (pos, key_ts);
        match self.entries.get_mut(&key) {
            Some(existing) => existing.merge(&reg),
            None => {
                self.entries.insert(key, reg);
            }
        }
    }

    fn delta(&self, since: &HybridTimestamp) -> Vec<Self::Op> {
        self.entries
            .iter()
            .filter(|(_, reg)| reg.timestamp() > since)
            .map(|((pos, key_ts), reg)| (*pos, key_ts.clone(), reg.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PeerId;

    fn ts(wall: i64, peer: &str) -> HybridTimestamp {
        HybridTimestamp::new(wall, 0, &PeerId::new(peer))
    }

    #[test]
    fn mediant_lands_strictly_between_neighbors() {
        let a = Frac::new(1, 1);
        let b = Frac::new(2, 1);
        let m = Frac::mediant(&a, &b);
        assert!(a < m && m < b);
    }

    #[test]
    fn insert_into_empty_array_uses_sentinels() {
        let mut arr: FractionalArray<&str> = FractionalArray::new();
        let pos = arr.insert_between(None, None, "only", ts(100, "p1"));
        assert_eq!(pos, Frac::mediant(&Frac::LEFT_SENTINEL, &Frac::RIGHT_SENTINEL));
        assert_eq!(arr.value(), vec!["only"]);
    }

    #[test]
    fn ordered_sequence_after_several_inserts() {
        let mut arr: FractionalArray<&str> = FractionalArray::new();
        let l = arr.insert_between(None, None, "L", ts(100, "p1"));
        let r = arr.insert_between(Some(&l), None, "R", ts(101, "p1"));
        let m = arr.insert_between(Some(&l), Some(&r), "M", ts(102, "p1"));
        assert!(l < m && m < r);
        assert_eq!(arr.value(), vec!["L", "M", "R"]);
    }

    #[test]
    fn concurrent_insert_at_same_mediant_both_survive_merge() {
        let mut arr: FractionalArray<&str> = FractionalArray::new();
        let l = arr.insert_between(None, None, "L", ts(100, "p1"));
        let r = arr.insert_between(Some(&l), None, "R", ts(101, "p1"));
        // Two concurrent inserts between the same pair of neighbors from
        // different peers: simulate by constructing two independent
        // arrays and merging.
        let mut arr_a = arr.clone();
        let mut arr_b = arr.clone();
        let pos_a = arr_a.insert_between(Some(&l), Some(&r), "A", ts(200, "p1"));
        let pos_b = arr_b.insert_between(Some(&l), Some(&r), "B", ts(200, "p2"));
        assert_eq!(pos_a, pos_b, "same neighbors deterministically choose the same mediant");
        arr_a.merge(&arr_b);
        // Both survive the collision. Relative order between the two is
        // the timestamp tie-break (equal wall/counter, "p1" < "p2"), the
        // same on every replica regardless of merge direction.
        assert_eq!(arr_a.value(), vec!["L", "A", "B", "R"]);
        let mut arr_b_merged = arr_b.clone();
        arr_b_merged.merge(&arr_a);
        assert_eq!(arr_b_merged.value(), arr_a.value());
    }

    #[test]
    fn remove_then_reinsert_is_not_visible_as_old_value() {
        let mut arr: FractionalArray<&str> = FractionalArray::new();
        let pos = arr.insert_between(None, None, "v1", ts(100, "p1"));
        arr.remove(&pos, ts(200, "p1"));
        assert!(arr.value().is_empty());
    }

    #[test]
    fn merge_idempotent() {
        let mut arr: FractionalArray<i32> = FractionalArray::new();
        arr.insert_between(None, None, 1, ts(100, "p1"));
        let snapshot = arr.clone();
        arr.merge(&snapshot);
        assert_eq!(arr.value(), vec![1]);
    }
}
