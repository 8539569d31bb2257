//! Physical/virtual resource entities (spec §3 "Resource").

use lattice_crdt::{Crdt, HybridTimestamp, LwwMap, LwwRegister};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Compute,
    Network,
    Storage,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Network => "network",
            Self::Storage => "storage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compute" => Some(Self::Compute),
            "network" => Some(Self::Network),
            "storage" => Some(Self::Storage),
            _ => None,
        }
    }

    /// The capacity dimensions a well-formed capacity vector must carry for
    /// this kind. Extra dimensions are tolerated; missing ones are not.
    pub fn required_dimensions(&self) -> &'static [&'static str] {
        match self {
            Self::Compute => &["cpu", "memory"],
            Self::Network => &["bandwidth"],
            Self::Storage => &["bytes", "iops"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    Active,
    Draining,
    Offline,
}

/// A sparse capacity vector, e.g. `{cpu: 8.0, memory: 32768.0}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityVector(pub HashMap<String, f64>);

impl CapacityVector {
    pub fn get(&self, dim: &str) -> f64 {
        self.0.get(dim).copied().unwrap_or(0.0)
    }

    pub fn matches_schema(&self, kind: ResourceKind) -> bool {
        kind.required_dimensions()
            .iter()
            .all(|dim| self.0.contains_key(*dim))
    }
}

impl FromIterator<(String, f64)> for CapacityVector {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A resource's mutable state is composed of independently-merging CRDT
/// fields; `kind` is set at creation and never changes, so it needs no
/// conflict resolution of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    pub capacity: LwwRegister<CapacityVector>,
    pub attributes: LwwMap<String, String>,
    pub state: LwwRegister<ResourceState>,
    /// Provider-adapter origin tag, when this resource came from an
    /// `inventory_push` rather than a direct admin operation. Drives the
    /// C7 grace-interval tombstoning rule.
    pub origin: LwwRegister<Option<String>>,
    /// Wall-ms until which this resource is excluded from placement after
    /// a `ControllerError` cool-off (spec §4.7 / §7).
    pub cooldown_until: LwwRegister<Option<i64>>,
}

impl Resource {
    pub fn new(id: String, kind: ResourceKind, capacity: CapacityVector, ts: HybridTimestamp) -> Self {
        Self {
            id,
            kind,
            capacity: LwwRegister::new(capacity, ts.clone()),
            attributes: LwwMap::new(),
            state: LwwRegister::new(ResourceState::Active, ts.clone()),
            origin: LwwRegister::new(None, ts.clone()),
            cooldown_until: LwwRegister::new(None, ts),
        }
    }

    /// Deep-merges every field CRDT of `other` into `self`. This is the
    /// resource-level analogue of [`Crdt::merge`]: `kind` never diverges
    /// between two writes to the same id, so it is not merged, only copied
    /// from whichever side is missing it.
    pub fn merge(&mut self, other: &Self) {
        self.capacity.merge(&other.capacity);
        self.attributes.merge(&other.attributes);
        self.state.merge(&other.state);
        self.origin.merge(&other.origin);
        self.cooldown_until.merge(&other.cooldown_until);
    }

    /// Most-recent write timestamp across every field, used to decide
    /// whether this resource belongs in a delta since some point in time.
    pub fn last_modified(&self) -> HybridTimestamp {
        [
            Some(self.capacity.timestamp().clone()),
            Some(self.state.timestamp().clone()),
            Some(self.origin.timestamp().clone()),
            Some(self.cooldown_until.timestamp().clone()),
            self.attributes.latest_timestamp(),
        ]
        .into_iter()
        .flatten()
        .max()
        .expect("at least one field always present")
    }

    /// Whether this resource is presently in a placement cool-off window.
    pub fn in_cooldown(&self, now_ms: i64) -> bool {
        self.cooldown_until.value().is_some_and(|until| now_ms < until)
    }

    pub fn view(&self) -> ResourceView {
        ResourceView {
            id: self.id.clone(),
            kind: self.kind,
            capacity: self.capacity.value(),
            attributes: self.attributes.value(),
            state: self.state.value(),
            origin: self.origin.value(),
        }
    }
}

/// Materialized, read-only snapshot of a [`Resource`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceView {
    pub id: String,
    pub kind: ResourceKind,
    pub capacity: CapacityVector,
    pub attributes: HashMap<String, String>,
    pub state: ResourceState,
    pub origin: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_crdt::PeerId;

    fn ts(wall: i64, peer: &str) -> HybridTimestamp {
        HybridTimestamp::new(wall, 0, &PeerId::new(peer))
    }

    #[test]
    fn capacity_schema_validation() {
        let cap: CapacityVector = [("cpu".to_string(), 8.0), ("memory".to_string(), 32.0)]
            .into_iter()
            .collect();
        assert!(cap.matches_schema(ResourceKind::Compute));
        assert!(!cap.matches_schema(ResourceKind::Storage));
    }

    #[test]
    fn concurrent_state_and_attribute_writes_both_survive_merge() {
        let cap: CapacityVector = [("cpu".into(), 8.0), ("memory".into(), 32.0)]
            .into_iter()
            .collect();
        let mut a = Resource::new("r1".into(), ResourceKind::Compute, cap, ts(100, "p1"));
        let mut b = a.clone();

        a.state.update(ResourceState::Draining, ts(150, "p1"));
        b.attributes.insert("rack".into(), "A1".into(), ts(151, "p2"));

        a.merge(&b);
        assert_eq!(a.state.value(), ResourceState::Draining);
        assert_eq!(a.attributes.get(&"rack".to_string()), Some("A1".to_string()));
    }
}
