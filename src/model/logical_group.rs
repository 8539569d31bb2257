//! Logical Infrastructure groupings (spec §3 "Logical Infrastructure").
//!
//! A named collection of resources addressed by logical slot rather than
//! physical position (e.g. "primary-db", "cache-shard-3"). Concurrent edits
//! to the same slot surface as siblings rather than clobbering one another,
//! since two peers assigning different resources to the same slot at the
//! same time is a real operational conflict an operator should see, not one
//! the system should silently pick a winner for.

use lattice_crdt::{Crdt, HybridTimestamp, LwwRegister, MvMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalGroup {
    pub id: String,
    pub name: LwwRegister<String>,
    pub members: MvMap<String, String>,
}

impl LogicalGroup {
    pub fn new(id: String, name: String, ts: HybridTimestamp) -> Self {
        Self {
            id,
            name: LwwRegister::new(name, ts),
            members: MvMap::new(),
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.name.merge(&other.name);
        self.members.merge(&other.members);
    }

    /// Assign `resource_id` to `slot`, superseding whatever this replica
    /// currently sees there.
    pub fn assign(&mut self, slot: String, resource_id: String, ts: HybridTimestamp) {
        self.members.write(slot, resource_id, ts);
    }

    pub fn unassign(&mut self, slot: &str, ts: HybridTimestamp) {
        self.members.remove(&slot.to_string(), ts);
    }

    pub fn view(&self) -> LogicalGroupView {
        LogicalGroupView {
            id: self.id.clone(),
            name: self.name.value(),
            members: self.members.value(),
        }
    }

    pub fn last_modified(&self) -> HybridTimestamp {
        [Some(self.name.timestamp().clone()), self.members.latest_timestamp()]
            .into_iter()
            .flatten()
            .max()
            .expect("a logical group always has at least its name's creation timestamp")
    }
}

/// Materialized view. `members` maps slot name to the set of currently
/// visible resource ids: a slot with more than one entry has an unresolved
/// concurrent assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalGroupView {
    pub id: String,
    pub name: String,
    pub members: HashMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_crdt::PeerId;

    fn ts(wall: i64, peer: &str) -> HybridTimestamp {
        HybridTimestamp::new(wall, 0, &PeerId::new(peer))
    }

    #[test]
    fn concurrent_slot_assignment_surfaces_as_siblings() {
        let mut g = LogicalGroup::new("lg1".into(), "web-tier".into(), ts(100, "p1"));
        let mut a = g.clone();
        let mut b = g.clone();
        a.assign("primary".into(), "r1".into(), ts(200, "p1"));
        b.assign("primary".into(), "r2".into(), ts(201, "p2"));
        a.merge(&b);
        let mut members = a.view().members.remove("primary").unwrap();
        members.sort();
        assert_eq!(members, vec!["r1".to_string(), "r2".to_string()]);
        g.merge(&a);
    }
}
