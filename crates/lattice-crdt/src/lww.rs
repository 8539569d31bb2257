//! Last-Writer-Wins Register and Last-Writer-Wins Map.

use crate::clock::HybridTimestamp;
use crate::traits::{Crdt, Delta};
use std::collections::HashMap;
use std::hash::Hash;

/// Holds a value and the timestamp it was written at. Merge keeps the value
/// with the greater timestamp; ties are impossible once two timestamps
/// differ in peer id (see [`HybridTimestamp`]'s `Ord`), which is the
/// tie-break rule this type relies on.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LwwRegister<T> {
    value: T,
    ts: HybridTimestamp,
}

impl<T: Clone> LwwRegister<T> {
    pub fn new(value: T, ts: HybridTimestamp) -> Self {
        Self { value, ts }
    }

    /// Record a local write. Caller must supply a timestamp strictly
    /// greater than any previous write to this register (the hybrid clock
    /// guarantees this for same-peer callers).
    pub fn update(&mut self, value: T, ts: HybridTimestamp) {
        self.value = value;
        self.ts = ts;
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn timestamp(&self) -> &HybridTimestamp {
        &self.ts
    }
}

impl<T: Clone> Crdt for LwwRegister<T> {
    type Value = T;

    fn merge(&mut self, other: &Self) {
        if other.ts > self.ts {
            self.value = other.value.clone();
            self.ts = other.ts.clone();
        }
    }

    fn value(&self) -> T {
        self.value.clone()
    }
}

impl<T: Clone> Delta for LwwRegister<T> {
    type Op = (T, HybridTimestamp);

    fn apply(&mut self, op: Self::Op) {
        self.update(op.0, op.1);
    }

    fn delta(&self, since: &HybridTimestamp) -> Vec<Self::Op> {
        if self.ts > *since {
            vec![(self.value.clone(), self.ts.clone())]
        } else {
            Vec::new()
        }
    }
}

/// A map from `K` to `LwwRegister<Option<V>>`. `None` represents a
/// tombstone: the key was created and then removed. A key that was never
/// created is simply absent from the map, indistinguishable from one whose
/// tombstone has a lower timestamp than any peer has observed (tombstones
/// are never garbage collected, per spec invariant I5).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LwwMap<K: Eq + Hash, V> {
    entries: HashMap<K, LwwRegister<Option<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Default for LwwMap<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> LwwMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: K, value: V, ts: HybridTimestamp) {
        match self.entries.get_mut(&key) {
            Some(reg) if reg.timestamp() <= &ts => reg.update(Some(value), ts),
            Some(_) => {}
            None => {
                self.entries.insert(key, LwwRegister::new(Some(value), ts));
            }
        }
    }

    pub fn remove(&mut self, key: &K, ts: HybridTimestamp) {
        match self.entries.get_mut(key) {
            Some(reg) if reg.timestamp() <= &ts => reg.update(None, ts),
            Some(_) => {}
            None => {
                self.entries
                    .insert(key.clone(), LwwRegister::new(None, ts));
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).and_then(|reg| reg.value())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries
            .iter()
            .filter_map(|(k, reg)| reg.get().as_ref().map(|v| (k, v)))
    }

    /// The most recent write timestamp across every key (including
    /// tombstones), or `None` if the map has never been written to. Used by
    /// callers that track an entity-level "last modified" watermark for
    /// delta extraction.
    pub fn latest_timestamp(&self) -> Option<HybridTimestamp> {
        self.entries.values().map(|reg| reg.timestamp().clone()).max()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Crdt for LwwMap<K, V> {
    type Value = HashMap<K, V>;

    fn merge(&mut self, other: &Self) {
        for (k, reg) in &other.entries {
            match self.entries.get_mut(k) {
                Some(existing) => existing.merge(reg),
                None => {
                    self.entries.insert(k.clone(), reg.clone());
                }
            }
        }
    }

    fn value(&self) -> HashMap<K, V> {
        self.entries
            .iter()
            .filter_map(|(k, reg)| reg.get().clone().map(|v| (k.clone(), v)))
            .collect()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Delta for LwwMap<K, V> {
    /// `(key, register-snapshot)`. Applying replays the register merge, so
    /// re-delivery of the same op is idempotent.
    type Op = (K, LwwRegister<Option<V>>);

    fn apply(&mut self, op: Self::Op) {
        let (key, reg) = op;
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
            .map(|(k, reg)| (k.clone(), reg.clone()))
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
    fn register_merge_keeps_later_write() {
        let mut a = LwwRegister::new("old", ts(100, "p1"));
        let b = LwwRegister::new("new", ts(200, "p2"));
        a.merge(&b);
        assert_eq!(*a.get(), "new");
    }

    #[test]
    fn register_merge_is_idempotent() {
        let mut a = LwwRegister::new(1, ts(100, "p1"));
        let snapshot = a.clone();
        a.merge(&snapshot);
        assert_eq!(a.value(), 1);
    }

    #[test]
    fn map_insert_and_remove_tombstones() {
        let mut m: LwwMap<String, i32> = LwwMap::new();
        m.insert("a".into(), 1, ts(100, "p1"));
        assert_eq!(m.get(&"a".to_string()), Some(1));
        m.remove(&"a".to_string(), ts(200, "p1"));
        assert_eq!(m.get(&"a".to_string()), None);
        assert!(!m.contains(&"a".to_string()));
    }

    #[test]
    fn map_merge_unions_keys() {
        let mut m1: LwwMap<String, i32> = LwwMap::new();
        m1.insert("a".into(), 1, ts(100, "p1"));
        let mut m2: LwwMap<String, i32> = LwwMap::new();
        m2.insert("b".into(), 2, ts(100, "p2"));
        m1.merge(&m2);
        assert_eq!(m1.get(&"a".to_string()), Some(1));
        assert_eq!(m1.get(&"b".to_string()), Some(2));
    }

    #[test]
    fn map_concurrent_add_then_remove_respects_timestamp() {
        let mut m1: LwwMap<String, i32> = LwwMap::new();
        m1.insert("a".into(), 1, ts(100, "p1"));
        let mut m2 = m1.clone();
        m2.remove(&"a".to_string(), ts(150, "p2"));
        let mut m3 = m1.clone();
        m3.insert("a".into(), 2, ts(160, "p1"));
        m2.merge(&m3);
        assert_eq!(m2.get(&"a".to_string()), Some(2));
    }
}
