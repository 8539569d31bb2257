//! Multi-Value Map.
//!
//! A map whose values are sets of `(value, timestamp)` siblings. A local
//! write supersedes every sibling this replica currently has visible for
//! that key (its hybrid timestamp is, by construction, greater than
//! anything this replica has already observed) but leaves untouched any
//! sibling written concurrently elsewhere that hasn't reached this replica
//! yet. Those surface as multiple siblings on `get()` until a later write
//! (local or merged-in) observes and supersedes them too.

use crate::clock::HybridTimestamp;
use crate::traits::{Crdt, Delta};
use std::collections::HashMap;
use std::hash::Hash;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MvMap<K: Eq + Hash, V> {
    siblings: HashMap<K, HashMap<Uuid, (V, HybridTimestamp)>>,
    tombstones: HashMap<K, HashMap<Uuid, HybridTimestamp>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Default for MvMap<K, V> {
    fn default() -> Self {
        Self {
            siblings: HashMap::new(),
            tombstones: HashMap::new(),
        }
    }
}

/// A single recorded mutation against one key.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum MvMapOp<K, V> {
    Write {
        key: K,
        tag: Uuid,
        value: V,
        ts: HybridTimestamp,
    },
    Supersede {
        key: K,
        tag: Uuid,
        ts: HybridTimestamp,
    },
}

impl<K: Eq + Hash + Clone, V: Clone> MvMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_tags(&self, key: &K) -> Vec<Uuid> {
        let tombstoned = self.tombstones.get(key);
        self.siblings
            .get(key)
            .map(|m| {
                m.keys()
                    .filter(|tag| !tombstoned.is_some_and(|t| t.contains_key(*tag)))
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write `value` for `key`, superseding every sibling currently visible
    /// at this replica.
    pub fn write(&mut self, key: K, value: V, ts: HybridTimestamp) -> Uuid {
        let observed = self.live_tags(&key);
        let tomb = self.tombstones.entry(key.clone()).or_default();
        for tag in observed {
            tomb.insert(tag, ts.clone());
        }
        let tag = Uuid::new_v4();
        self.siblings
            .entry(key)
            .or_default()
            .insert(tag, (value, ts));
        tag
    }

    /// Remove every sibling currently visible at this replica for `key`,
    /// without writing a replacement.
    pub fn remove(&mut self, key: &K, ts: HybridTimestamp) {
        let observed = self.live_tags(key);
        let tomb = self.tombstones.entry(key.clone()).or_default();
        for tag in observed {
            tomb.insert(tag, ts.clone());
        }
    }

    /// All siblings currently visible for `key`. Empty if absent or fully
    /// tombstoned; more than one element means a concurrent write is still
    /// unresolved.
    pub fn get(&self, key: &K) -> Vec<V> {
        let tombstoned = self.tombstones.get(key);
        self.siblings
            .get(key)
            .map(|m| {
                m.iter()
                    .filter(|(tag, _)| !tombstoned.is_some_and(|t| t.contains_key(**tag)))
                    .map(|(_, (v, _))| v.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.siblings.keys()
    }

    /// The most recent write timestamp across every sibling and tombstone,
    /// or `None` if empty.
    pub fn latest_timestamp(&self) -> Option<HybridTimestamp> {
        self.siblings
            .values()
            .flat_map(|m| m.values().map(|(_, ts)| ts.clone()))
            .chain(
                self.tombstones
                    .values()
                    .flat_map(|m| m.values().cloned()),
            )
            .max()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Crdt for MvMap<K, V> {
    type Value = HashMap<K, Vec<V>>;

    fn merge(&mut self, other: &Self) {
        for (key, entries) in &other.siblings {
            let slot = self.siblings.entry(key.clone()).or_default();
            for (tag, entry) in entries {
                slot.entry(*tag).or_insert_with(|| entry.clone());
            }
        }
        for (key, tombs) in &other.tombstones {
            let slot = self.tombstones.entry(key.clone()).or_default();
            for (tag, ts) in tombs {
                slot.entry(*tag)
                    .and_modify(|existing| {
                        if ts > existing {
                            *existing = ts.clone();
                        }
                    })
                    .or_insert_with(|| ts.clone());
            }
        }
    }

    fn value(&self) -> HashMap<K, Vec<V>> {
        self.siblings
            .keys()
            .map(|k| (k.clone(), self.get(k)))
            .collect()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Delta for MvMap<K, V> {
    type Op = MvMapOp<K, V>;

    fn apply(&mut self, op: Self::Op) {
        match op {
            MvMapOp::Write {
                key,
                tag,
                value,
                ts,
            } => {
                self.siblings
                    .entry(key)
                    .or_default()
                    .entry(tag)
                    .or_insert((value, ts));
            }
            MvMapOp::Supersede { key, tag, ts } => {
                let slot = self.tombstones.entry(key).or_default();
                slot.entry(tag)
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
        let mut ops = Vec::new();
        for (key, entries) in &self.siblings {
            for (tag, (value, ts)) in entries {
                if ts > since {
                    ops.push(MvMapOp::Write {
                        key: key.clone(),
                        tag: *tag,
                        value: value.clone(),
                        ts: ts.clone(),
                    });
                }
            }
        }
        for (key, tombs) in &self.tombstones {
            for (tag, ts) in tombs {
                if ts > since {
                    ops.push(MvMapOp::Supersede {
                        key: key.clone(),
                        tag: *tag,
                        ts: ts.clone(),
                    });
                }
            }
        }
        ops
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
    fn single_writer_supersedes_own_prior_write() {
        let mut m: MvMap<String, String> = MvMap::new();
        m.write("slot".into(), "r1".into(), ts(100, "p1"));
        m.write("slot".into(), "r2".into(), ts(200, "p1"));
        assert_eq!(m.get(&"slot".to_string()), vec!["r2".to_string()]);
    }

    #[test]
    fn concurrent_writes_surface_as_siblings() {
        let mut base: MvMap<String, String> = MvMap::new();
        base.write("slot".into(), "r0".into(), ts(100, "p1"));

        let mut a = base.clone();
        let mut b = base.clone();
        a.write("slot".into(), "ra".into(), ts(200, "p1"));
        b.write("slot".into(), "rb".into(), ts(201, "p2"));

        a.merge(&b);
        let mut got = a.get(&"slot".to_string());
        got.sort();
        assert_eq!(got, vec!["ra".to_string(), "rb".to_string()]);
    }

    #[test]
    fn later_write_that_observes_both_siblings_resolves_conflict() {
        let mut base: MvMap<String, String> = MvMap::new();
        base.write("slot".into(), "r0".into(), ts(100, "p1"));
        let mut a = base.clone();
        let mut b = base.clone();
        a.write("slot".into(), "ra".into(), ts(200, "p1"));
        b.write("slot".into(), "rb".into(), ts(201, "p2"));
        a.merge(&b);
        // a now observes both ra and rb; a fresh write here supersedes both.
        a.write("slot".into(), "resolved".into(), ts(300, "p1"));
        assert_eq!(a.get(&"slot".to_string()), vec!["resolved".to_string()]);
    }

    #[test]
    fn merge_idempotent() {
        let mut m: MvMap<String, i32> = MvMap::new();
        m.write("k".into(), 1, ts(100, "p1"));
        let snapshot = m.clone();
        m.merge(&snapshot);
        assert_eq!(m.get(&"k".to_string()), vec![1]);
    }
}
