//! Observed-Removed Set.
//!
//! Elements are stored as `{value, unique-tag, addition-timestamp}`.
//! Removal emits a tombstone for each tag *observed* at removal time, so a
//! concurrent add (which mints a fresh tag) survives a concurrent remove —
//! re-adding after removal always produces a new observable element.

use crate::clock::HybridTimestamp;
use crate::traits::{Crdt, Delta};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OrSet<T: Clone + Eq + Hash> {
    adds: HashMap<Uuid, (T, HybridTimestamp)>,
    tombstones: HashMap<Uuid, HybridTimestamp>,
}

impl<T: Clone + Eq + Hash> Default for OrSet<T> {
    fn default() -> Self {
        Self {
            adds: HashMap::new(),
            tombstones: HashMap::new(),
        }
    }
}

/// A single recorded mutation, for gossip transfer and idempotent replay.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum OrSetOp<T> {
    Add {
        tag: Uuid,
        value: T,
        ts: HybridTimestamp,
    },
    Remove {
        tag: Uuid,
        ts: HybridTimestamp,
    },
}

impl<T: Clone + Eq + Hash> OrSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value`, minting a fresh unique tag. Returns the tag so callers
    /// needing to correlate this element (e.g. to remove exactly this
    /// addition) can keep it.
    pub fn add(&mut self, value: T, ts: HybridTimestamp) -> Uuid {
        let tag = Uuid::new_v4();
        self.adds.insert(tag, (value, ts));
        tag
    }

    /// Remove every currently-observed (non-tombstoned) tag whose value
    /// equals `value`. A concurrent add of the same value under a
    /// different, not-yet-observed tag is unaffected.
    pub fn remove(&mut self, value: &T, ts: HybridTimestamp) {
        let observed: Vec<Uuid> = self
            .adds
            .iter()
            .filter(|(tag, (v, _))| v == value && !self.tombstones.contains_key(*tag))
            .map(|(tag, _)| *tag)
            .collect();
        for tag in observed {
            self.tombstones.insert(tag, ts.clone());
        }
    }

    pub fn contains(&self, value: &T) -> bool {
        self.adds
            .iter()
            .any(|(tag, (v, _))| v == value && !self.tombstones.contains_key(tag))
    }

    pub fn is_empty(&self) -> bool {
        self.adds
            .keys()
            .all(|tag| self.tombstones.contains_key(tag))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.adds
            .iter()
            .filter(|(tag, _)| !self.tombstones.contains_key(*tag))
            .map(|(_, (v, _))| v)
    }

    /// The most recent write timestamp across every add and tombstone, or
    /// `None` if empty.
    pub fn latest_timestamp(&self) -> Option<HybridTimestamp> {
        self.adds
            .values()
            .map(|(_, ts)| ts.clone())
            .chain(self.tombstones.values().cloned())
            .max()
    }
}

impl<T: Clone + Eq + Hash> Crdt for OrSet<T> {
    type Value = HashSet<T>;

    fn merge(&mut self, other: &Self) {
        for (tag, entry) in &other.adds {
            self.adds.entry(*tag).or_insert_with(|| entry.clone());
        }
        for (tag, ts) in &other.tombstones {
            self.tombstones
                .entry(*tag)
                .and_modify(|existing| {
                    if ts > existing {
                        *existing = ts.clone();
                    }
                })
                .or_insert_with(|| ts.clone());
        }
    }

    fn value(&self) -> HashSet<T> {
        self.iter().cloned().collect()
    }
}

impl<T: Clone + Eq + Hash> Delta for OrSet<T> {
    type Op = OrSetOp<T>;

    fn apply(&mut self, op: Self::Op) {
        match op {
            OrSetOp::Add { tag, value, ts } => {
                self.adds.entry(tag).or_insert((value, ts));
            }
            OrSetOp::Remove { tag, ts } => {
                self.tombstones
                    .entry(tag)
                    .and_modify(|existing| {
                        if ts > *existing {
                            *existing = ts.clone();
                        }
                    })
                    .or_insert(ts);
            }
        }
    }

    fn delta(&self, since: &HybridTimestamp) -> Vec<Self::Op> {
        let mut ops: Vec<Self::Op> = self
            .adds
            .iter()
            .filter(|(_, (_, ts))| ts > since)
            .map(|(tag, (value, ts))| OrSetOp::Add {
                tag: *tag,
                value: value.clone(),
                ts: ts.clone(),
            })
            .collect();
        ops.extend(self.tombstones.iter().filter(|(_, ts)| *ts > since).map(
            |(tag, ts)| OrSetOp::Remove {
                tag: *tag,
                ts: ts.clone(),
            },
        ));
        ops
    }
}
