//! The logical infrastructure model (C3): typed, validated operations over
//! the CRDT substrate in `lattice-crdt`. Resources live in a single flat
//! id-keyed map; datacenters, rows, racks, and logical groups reference
//! resources only by id (spec §9 "no aggregate owns a resource
//! exclusively"). Validation is local read-then-write — it narrows the
//! common case but is not mutual exclusion, since writes remain LWW/CRDT
//! underneath (spec §4.3).

pub mod claim;
pub mod datacenter;
pub mod logical_group;
pub mod resource;

pub use claim::{Claim, ClaimStatus, ClaimView, ResourceProfile, MAINTENANCE_TENANT};
pub use datacenter::{Datacenter, Rack, Row};
pub use logical_group::{LogicalGroup, LogicalGroupView};
pub use resource::{CapacityVector, Resource, ResourceKind, ResourceState, ResourceView};

use crate::error::{UnknownEntityError, ValidationError};
use lattice_crdt::{Crdt, Delta, Frac, HybridTimestamp, LwwMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The merged logical infrastructure: every entity this peer currently
/// knows about, across every datacenter and tenant. One instance per
/// process, guarded by the single read/write discipline described in
/// spec §5 (callers serialize access; this type itself has no internal
/// locking).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceModel {
    resources: HashMap<String, Resource>,
    datacenters: HashMap<String, Datacenter>,
    logical_groups: HashMap<String, LogicalGroup>,
    claims: HashMap<String, Claim>,
    tenant_shares: LwwMap<String, u32>,
    default_share: u32,
}

impl ResourceModel {
    pub fn new(default_share: u32) -> Self {
        Self {
            resources: HashMap::new(),
            datacenters: HashMap::new(),
            logical_groups: HashMap::new(),
            claims: HashMap::new(),
            tenant_shares: LwwMap::new(),
            default_share,
        }
    }

    // ---------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------

    pub fn upsert_resource(
        &mut self,
        id: &str,
        kind: ResourceKind,
        capacity: CapacityVector,
        ts: HybridTimestamp,
    ) -> Result<(), ValidationError> {
        if id.trim().is_empty() {
            return Err(ValidationError::InvalidId);
        }
        if !capacity.matches_schema(kind) {
            return Err(ValidationError::CapacityShape {
                kind: kind.as_str().to_string(),
            });
        }
        match self.resources.get_mut(id) {
            Some(existing) => {
                existing.capacity.merge(&lattice_crdt::LwwRegister::new(capacity, ts));
            }
            None => {
                self.resources
                    .insert(id.to_string(), Resource::new(id.to_string(), kind, capacity, ts));
            }
        }
        Ok(())
    }

    pub fn set_resource_state(
        &mut self,
        id: &str,
        state: ResourceState,
        ts: HybridTimestamp,
    ) -> Result<(), UnknownEntityError> {
        let resource = self.resources.get_mut(id).ok_or_else(|| UnknownEntityError {
            kind: "resource",
            id: id.to_string(),
        })?;
        resource.state.update(state, ts);
        Ok(())
    }

    pub fn set_resource_attribute(
        &mut self,
        id: &str,
        key: String,
        value: String,
        ts: HybridTimestamp,
    ) -> Result<(), UnknownEntityError> {
        let resource = self.resources.get_mut(id).ok_or_else(|| UnknownEntityError {
            kind: "resource",
            id: id.to_string(),
        })?;
        resource.attributes.insert(key, value, ts);
        Ok(())
    }

    /// Mark a resource degraded until `until_ms` (spec §4.7 controller
    /// cool-off on `ControllerError`).
    pub fn cool_off_resource(&mut self, id: &str, until_ms: i64, ts: HybridTimestamp) -> Result<(), UnknownEntityError> {
        let resource = self.resources.get_mut(id).ok_or_else(|| UnknownEntityError {
            kind: "resource",
            id: id.to_string(),
        })?;
        resource.cooldown_until.update(Some(until_ms), ts);
        Ok(())
    }

    pub fn resource_view(&self, id: &str) -> Option<ResourceView> {
        self.resources.get(id).map(Resource::view)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Applies one controller-adapter `inventory_push` (spec §4.7): the
    /// adapter is authoritative for its own `origin`, so every resource in
    /// `resources` is written wholesale rather than merged against
    /// whatever a prior push or admin edit left behind. Returns the ids
    /// written, so the caller can diff against what it previously saw from
    /// this origin to drive grace-interval tombstoning.
    pub fn inventory_push(
        &mut self,
        origin: &str,
        resources: Vec<(String, ResourceKind, CapacityVector, HashMap<String, String>)>,
        ts: HybridTimestamp,
    ) -> Result<Vec<String>, ValidationError> {
        let mut seen = Vec::with_capacity(resources.len());
        for (id, kind, capacity, attrs) in resources {
            if id.trim().is_empty() {
                return Err(ValidationError::InvalidId);
            }
            if !capacity.matches_schema(kind) {
                return Err(ValidationError::CapacityShape {
                    kind: kind.as_str().to_string(),
                });
            }
            let resource = self
                .resources
                .entry(id.clone())
                .or_insert_with(|| Resource::new(id.clone(), kind, capacity.clone(), ts.clone()));
            resource.capacity.update(capacity, ts.clone());
            resource.origin.update(Some(origin.to_string()), ts.clone());
            resource.state.update(ResourceState::Active, ts.clone());
            for (k, v) in attrs {
                resource.attributes.insert(k, v, ts.clone());
            }
            seen.push(id);
        }
        Ok(seen)
    }

    /// Ids of resources currently tagged with `origin`, regardless of
    /// state — used to detect ids dropped from a fresh push.
    pub fn resource_ids_with_origin(&self, origin: &str) -> Vec<String> {
        self.resources
            .values()
            .filter(|r| r.origin.value().as_deref() == Some(origin))
            .map(|r| r.id.clone())
            .collect()
    }

    // ---------------------------------------------------------------
    // Physical layout
    // ---------------------------------------------------------------

    pub fn create_datacenter(&mut self, id: &str, name: &str, ts: HybridTimestamp) -> Result<(), ValidationError> {
        if id.trim().is_empty() {
            return Err(ValidationError::InvalidId);
        }
        self.datacenters
            .entry(id.to_string())
            .or_insert_with(|| Datacenter::new(id.to_string(), name.to_string(), ts));
        Ok(())
    }

    pub fn set_datacenter_location(
        &mut self,
        id: &str,
        key: String,
        value: String,
        ts: HybridTimestamp,
    ) -> Result<(), UnknownEntityError> {
        let dc = self.datacenters.get_mut(id).ok_or_else(|| UnknownEntityError {
            kind: "datacenter",
            id: id.to_string(),
        })?;
        dc.location.insert(key, value, ts);
        Ok(())
    }

    /// Attaches `resource_id` into a rack in `datacenter_id`, per spec
    /// §4.3's `attach_to_rack` (row/rack creation is on-demand via
    /// [`Datacenter::attach_resource`]).
    pub fn attach_to_rack(
        &mut self,
        resource_id: &str,
        datacenter_id: &str,
        row_idx: usize,
        rack_idx: usize,
        position_hint: Option<Frac>,
        ts: HybridTimestamp,
    ) -> Result<Frac, UnknownEntityError> {
        if !self.resources.contains_key(resource_id) {
            return Err(UnknownEntityError {
                kind: "resource",
                id: resource_id.to_string(),
            });
        }
        let dc = self
            .datacenters
            .get_mut(datacenter_id)
            .ok_or_else(|| UnknownEntityError {
                kind: "datacenter",
                id: datacenter_id.to_string(),
            })?;
        Ok(dc.attach_resource(row_idx, rack_idx, resource_id.to_string(), position_hint, ts))
    }

    pub fn datacenter_view(&self, id: &str) -> Option<&Datacenter> {
        self.datacenters.get(id)
    }

    // ---------------------------------------------------------------
    // Logical groups
    // ---------------------------------------------------------------

    pub fn create_logical_group(&mut self, id: &str, name: &str, ts: HybridTimestamp) -> Result<(), ValidationError> {
        if id.trim().is_empty() {
            return Err(ValidationError::InvalidId);
        }
        self.logical_groups
            .entry(id.to_string())
            .or_insert_with(|| LogicalGroup::new(id.to_string(), name.to_string(), ts));
        Ok(())
    }

    pub fn assign_logical_slot(
        &mut self,
        group_id: &str,
        slot: String,
        resource_id: String,
        ts: HybridTimestamp,
    ) -> Result<(), UnknownEntityError> {
        let group = self
            .logical_groups
            .get_mut(group_id)
            .ok_or_else(|| UnknownEntityError {
                kind: "logical_group",
                id: group_id.to_string(),
            })?;
        group.assign(slot, resource_id, ts);
        Ok(())
    }

    pub fn logical_group_view(&self, id: &str) -> Option<LogicalGroupView> {
        self.logical_groups.get(id).map(LogicalGroup::view)
    }

    // ---------------------------------------------------------------
    // Claims
    // ---------------------------------------------------------------

    pub fn submit_claim(&mut self, claim: Claim) -> Result<(), ValidationError> {
        let (start, end) = claim.window.value();
        if end <= start {
            return Err(ValidationError::InvalidWindow);
        }
        if claim.profiles.value().iter().any(|p| p.quantity == 0) {
            return Err(ValidationError::InvalidQuantity);
        }
        match self.claims.get_mut(&claim.id) {
            Some(existing) => existing.merge(&claim),
            None => {
                self.claims.insert(claim.id.clone(), claim);
            }
        }
        Ok(())
    }

    pub fn withdraw_claim(&mut self, id: &str, ts: HybridTimestamp) -> Result<(), UnknownEntityError> {
        let claim = self.claims.get_mut(id).ok_or_else(|| UnknownEntityError {
            kind: "claim",
            id: id.to_string(),
        })?;
        claim.status.update(ClaimStatus::Rejected, ts);
        Ok(())
    }

    pub fn claim(&self, id: &str) -> Option<&Claim> {
        self.claims.get(id)
    }

    pub fn claim_mut(&mut self, id: &str) -> Option<&mut Claim> {
        self.claims.get_mut(id)
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    pub fn claim_view(&self, id: &str) -> Option<ClaimView> {
        self.claims.get(id).map(Claim::view)
    }

    // ---------------------------------------------------------------
    // Tenant shares
    // ---------------------------------------------------------------

    pub fn tenant_share(&self, tenant_id: &str) -> u32 {
        self.tenant_shares
            .get(&tenant_id.to_string())
            .unwrap_or(self.default_share)
    }

    pub fn set_tenant_share(&mut self, tenant_id: &str, share: u32, ts: HybridTimestamp) {
        self.tenant_shares.insert(tenant_id.to_string(), share, ts);
    }

    // ---------------------------------------------------------------
    // Merge
    // ---------------------------------------------------------------

    /// Folds `other`'s full state into `self`, entity by entity. Each
    /// entity's own `merge` is commutative/associative/idempotent, and a
    /// union of independent entity merges inherits those properties, so
    /// this satisfies P1/P2 for the model as a whole.
    pub fn merge(&mut self, other: &Self) {
        for (id, r) in &other.resources {
            match self.resources.get_mut(id) {
                Some(existing) => existing.merge(r),
                None => {
                    self.resources.insert(id.clone(), r.clone());
                }
            }
        }
        for (id, dc) in &other.datacenters {
            match self.datacenters.get_mut(id) {
                Some(existing) => existing.merge(dc),
                None => {
                    self.datacenters.insert(id.clone(), dc.clone());
                }
            }
        }
        for (id, lg) in &other.logical_groups {
            match self.logical_groups.get_mut(id) {
                Some(existing) => existing.merge(lg),
                None => {
                    self.logical_groups.insert(id.clone(), lg.clone());
                }
            }
        }
        for (id, c) in &other.claims {
            match self.claims.get_mut(id) {
                Some(existing) => existing.merge(c),
                None => {
                    self.claims.insert(id.clone(), c.clone());
                }
            }
        }
        self.tenant_shares.merge(&other.tenant_shares);
    }

    // ---------------------------------------------------------------
    // Wire-level delta extraction / application (spec §4.2, §6)
    // ---------------------------------------------------------------

    /// Every entity whose last modification is strictly newer than
    /// `since`, as whole-entity [`crate::wire::DeltaOp`]s (see
    /// `crate::wire` module docs for the per-entity-not-per-field
    /// granularity decision).
    pub fn delta_since(&self, since: &HybridTimestamp) -> Vec<crate::wire::DeltaOp> {
        use crate::wire::{DeltaOp, EntityKind, EntityPayload};
        let mut ops = Vec::new();
        for (id, r) in &self.resources {
            let ts = r.last_modified();
            if &ts > since {
                ops.push(DeltaOp::new(EntityKind::Resource, id, ts, EntityPayload::Resource(Box::new(r.clone()))));
            }
        }
        for (id, dc) in &self.datacenters {
            let ts = dc.last_modified();
            if &ts > since {
                ops.push(DeltaOp::new(EntityKind::Datacenter, id, ts, EntityPayload::Datacenter(Box::new(dc.clone()))));
            }
        }
        for (id, lg) in &self.logical_groups {
            let ts = lg.last_modified();
            if &ts > since {
                ops.push(DeltaOp::new(EntityKind::LogicalGroup, id, ts, EntityPayload::LogicalGroup(Box::new(lg.clone()))));
            }
        }
        for (id, c) in &self.claims {
            let ts = c.last_modified();
            if &ts > since {
                ops.push(DeltaOp::new(EntityKind::Claim, id, ts, EntityPayload::Claim(Box::new(c.clone()))));
            }
        }
        for (tenant, reg) in self.tenant_shares.delta(since) {
            ops.push(crate::wire::DeltaOp::new(
                EntityKind::TenantShare,
                tenant,
                reg.timestamp().clone(),
                EntityPayload::TenantShare(reg.value()),
            ));
        }
        ops
    }

    /// Apply one remote [`crate::wire::DeltaOp`], merging it into whatever
    /// this replica already has for that entity (or adopting it wholesale
    /// if this is the first time the entity has been observed).
    pub fn apply_delta(&mut self, op: crate::wire::DeltaOp) {
        use crate::wire::EntityPayload;
        match op.payload {
            EntityPayload::Resource(r) => match self.resources.get_mut(&op.entity_id) {
                Some(existing) => existing.merge(&r),
                None => {
                    self.resources.insert(op.entity_id, *r);
                }
            },
            EntityPayload::Datacenter(dc) => match self.datacenters.get_mut(&op.entity_id) {
                Some(existing) => existing.merge(&dc),
                None => {
                    self.datacenters.insert(op.entity_id, *dc);
                }
            },
            EntityPayload::LogicalGroup(lg) => match self.logical_groups.get_mut(&op.entity_id) {
                Some(existing) => existing.merge(&lg),
                None => {
                    self.logical_groups.insert(op.entity_id, *lg);
                }
            },
            EntityPayload::Claim(c) => match self.claims.get_mut(&op.entity_id) {
                Some(existing) => existing.merge(&c),
                None => {
                    self.claims.insert(op.entity_id, *c);
                }
            },
            EntityPayload::TenantShare(value) => {
                self.tenant_shares.apply((
                    op.entity_id,
                    lattice_crdt::LwwRegister::new(value, op.ts),
                ));
            }
        }
    }

    /// The greatest timestamp observed across every entity in this model,
    /// or the clock epoch for `peer` if the model is empty. Used to
    /// annotate self-describing snapshots (spec §4.4).
    pub fn high_water_mark(&self, peer: lattice_crdt::PeerId) -> HybridTimestamp {
        self.resources
            .values()
            .map(Resource::last_modified)
            .chain(self.datacenters.values().map(Datacenter::last_modified))
            .chain(self.logical_groups.values().map(LogicalGroup::last_modified))
            .chain(self.claims.values().map(Claim::last_modified))
            .chain(self.tenant_shares.latest_timestamp())
            .max()
            .unwrap_or_else(|| HybridTimestamp::epoch(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_crdt::PeerId;

    fn ts(wall: i64, peer: &str) -> HybridTimestamp {
        HybridTimestamp::new(wall, 0, &PeerId::new(peer))
    }

    fn compute_cap() -> CapacityVector {
        [("cpu".to_string(), 8.0), ("memory".to_string(), 32.0)]
            .into_iter()
            .collect()
    }

    #[test]
    fn upsert_rejects_mismatched_capacity_shape() {
        let mut m = ResourceModel::new(1);
        let bad: CapacityVector = [("cpu".to_string(), 8.0)].into_iter().collect();
        let err = m
            .upsert_resource("r1", ResourceKind::Compute, bad, ts(100, "p1"))
            .unwrap_err();
        assert_eq!(err, ValidationError::CapacityShape { kind: "compute".into() });
    }

    #[test]
    fn set_state_on_unknown_resource_fails() {
        let mut m = ResourceModel::new(1);
        let err = m
            .set_resource_state("ghost", ResourceState::Draining, ts(100, "p1"))
            .unwrap_err();
        assert_eq!(err.id, "ghost");
    }

    #[test]
    fn s1_two_peers_converge_on_independently_created_resources() {
        let mut p1 = ResourceModel::new(1);
        p1.upsert_resource("r1", ResourceKind::Compute, compute_cap(), ts(100, "p1"))
            .unwrap();

        let mut p2 = ResourceModel::new(1);
        p2.upsert_resource("r2", ResourceKind::Compute, compute_cap(), ts(101, "p2"))
            .unwrap();

        p1.merge(&p2);
        p2.merge(&p1);

        assert!(p1.resource_view("r1").is_some());
        assert!(p1.resource_view("r2").is_some());
        assert!(p2.resource_view("r1").is_some());
        assert!(p2.resource_view("r2").is_some());
    }

    #[test]
    fn tenant_share_defaults_when_unset() {
        let mut m = ResourceModel::new(3);
        assert_eq!(m.tenant_share("tenant-a"), 3);
        m.set_tenant_share("tenant-a", 10, ts(100, "p1"));
        assert_eq!(m.tenant_share("tenant-a"), 10);
    }

    #[test]
    fn submit_claim_rejects_empty_window() {
        let mut m = ResourceModel::new(1);
        let claim = Claim::new("c1".into(), "tenant-a".into(), (100, 100), 0, ts(100, "p1"));
        let err = m.submit_claim(claim).unwrap_err();
        assert_eq!(err, ValidationError::InvalidWindow);
    }

    #[test]
    fn delta_since_round_trips_into_a_fresh_replica() {
        let mut p1 = ResourceModel::new(1);
        p1.upsert_resource("r1", ResourceKind::Compute, compute_cap(), ts(100, "p1"))
            .unwrap();
        p1.create_datacenter("dc1", "dc-east", ts(101, "p1")).unwrap();

        let epoch = HybridTimestamp::epoch(PeerId::new("p1"));
        let ops = p1.delta_since(&epoch);
        assert_eq!(ops.len(), 2);

        let mut p2 = ResourceModel::new(1);
        for op in ops {
            p2.apply_delta(op);
        }
        assert!(p2.resource_view("r1").is_some());
        assert!(p2.datacenter_view("dc1").is_some());
    }

    #[test]
    fn withdraw_claim_marks_rejected() {
        let mut m = ResourceModel::new(1);
        let claim = Claim::new("c1".into(), "tenant-a".into(), (0, 1000), 0, ts(100, "p1"));
        m.submit_claim(claim).unwrap();
        m.withdraw_claim("c1", ts(200, "p1")).unwrap();
        assert_eq!(m.claim_view("c1").unwrap().status, ClaimStatus::Rejected);
    }
}
