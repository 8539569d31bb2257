//! Capability traits shared by every CRDT primitive.
//!
//! Every primitive in this crate implements [`Crdt`] (pure merge + a
//! deterministic materialized view) and, where delta extraction makes
//! sense for gossip, [`Delta`] (record a local mutation, extract the
//! operations since a given timestamp). There is no dynamic dispatch across
//! primitive types; the resource model composes concrete types directly.

use crate::clock::HybridTimestamp;

/// A conflict-free replicated data type: merge is commutative, associative,
/// and idempotent, and `value()` materializes a deterministic read.
pub trait Crdt {
    type Value;

    /// Fold `other`'s state into `self`. Must be commutative, associative,
    /// and idempotent (`merge(s, s) == s`).
    fn merge(&mut self, other: &Self);

    /// Deterministic materialized view of the current state.
    fn value(&self) -> Self::Value;
}

/// A CRDT that can record local mutations as timestamped operations and
/// extract the subset of its history a peer hasn't seen yet.
pub trait Delta: Crdt {
    type Op: Clone;

    /// Record a local mutation.
    fn apply(&mut self, op: Self::Op);

    /// All operations with a timestamp strictly greater than `since`.
    fn delta(&self, since: &HybridTimestamp) -> Vec<Self::Op>;
}
