//! Dominant Resource Fairness ranking (spec §4.5 "Fair-share policy").
//!
//! Implementation note (recorded in DESIGN.md): ratios are computed over
//! **current-instant contention** — each tenant's already-admitted-or-placed
//! claims at decision time, not integrated over the candidate claim's
//! window. This resolves spec.md §9 Open Question 3.

use std::collections::HashSet;

use crate::model::{Claim, ClaimStatus, ResourceKind, ResourceModel};

use super::availability::claims_for_tenant;

/// How many units of `kind` a tenant is already committed to across its
/// non-terminal claims, excluding `exclude_claim_id` (the candidate itself,
/// so a claim being re-evaluated doesn't count against its own ratio).
fn tenant_committed(model: &ResourceModel, tenant: &str, kind: ResourceKind, exclude_claim_id: Option<&str>) -> u64 {
    claims_for_tenant(model, tenant)
        .filter(|c| Some(c.id.as_str()) != exclude_claim_id)
        .filter(|c| matches!(c.status.value(), ClaimStatus::Admitted | ClaimStatus::Placed))
        .flat_map(|c| c.profiles.value().into_iter().collect::<Vec<_>>())
        .filter(|p| p.kind == kind)
        .map(|p| p.quantity)
        .sum()
}

/// Total units of `kind` this pool can ever offer (active, unconditional on
/// any particular window — the same pool every tenant's ratio is measured
/// against).
fn total_capacity(model: &ResourceModel, kind: ResourceKind) -> u64 {
    model.resources().filter(|r| r.kind == kind).count() as u64
}

/// The dominant share ratio tenant `tenant` would have if `candidate` were
/// admitted: the maximum, across every resource kind the claim's profiles
/// touch, of `(committed + requested) / total_capacity`, normalized by the
/// tenant's configured share (spec §4.5 "tenant t is entitled to `s_t / Σs`
/// of the pool's active capacity" — dividing raw contention by `s_t` puts
/// every tenant's ratio on the same entitlement-relative scale, so a tenant
/// with a bigger share ranks as if it were less contended). A kind with
/// zero pool capacity contributes `f64::INFINITY` (unplaceable, so it
/// should never win a ranking contest over a claim that fits somewhere).
pub fn prospective_dominant_share(model: &ResourceModel, candidate: &Claim, exclude_claim_id: Option<&str>) -> f64 {
    let share = model.tenant_share(&candidate.tenant).max(1) as f64;
    let kinds: HashSet<ResourceKind> = candidate.profiles.value().iter().map(|p| p.kind).collect();
    kinds
        .into_iter()
        .map(|kind| {
            let requested: u64 = candidate
                .profiles
                .value()
                .into_iter()
                .filter(|p| p.kind == kind)
                .map(|p| p.quantity)
                .sum();
            let committed = tenant_committed(model, &candidate.tenant, kind, exclude_claim_id);
            let total = total_capacity(model, kind);
            if total == 0 {
                f64::INFINITY
            } else {
                (committed + requested) as f64 / total as f64 / share
            }
        })
        .fold(0.0_f64, f64::max)
}

/// Pending claims ranked for admission: ascending dominant-share ratio
/// across tenants; within a tenant, descending priority, then ascending
/// `start_ms`, then ascending claim id (spec §4.5).
pub fn rank_pending(model: &ResourceModel) -> Vec<String> {
    let mut ranked: Vec<(f64, i32, i64, String)> = model
        .claims()
        .filter(|c| c.status.value() == ClaimStatus::Pending && !c.is_maintenance())
        .map(|c| {
            let ratio = prospective_dominant_share(model, c, Some(c.id.as_str()));
            let (start, _end) = c.window.value();
            (ratio, c.priority.value(), start, c.id.clone())
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.2.cmp(&b.2))
            .then_with(|| a.3.cmp(&b.3))
    });
    ranked.into_iter().map(|(_, _, _, id)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CapacityVector, ResourceProfile};
    use lattice_crdt::{HybridTimestamp, PeerId};

    fn ts(wall: i64, peer: &str) -> HybridTimestamp {
        HybridTimestamp::new(wall, 0, &PeerId::new(peer))
    }

    fn cap() -> CapacityVector {
        [("cpu".to_string(), 1.0), ("memory".to_string(), 1.0)].into_iter().collect()
    }

    #[test]
    fn lower_contention_tenant_ranks_first() {
        let mut model = ResourceModel::new(1);
        for i in 0..4 {
            model
                .upsert_resource(&format!("r{i}"), ResourceKind::Compute, cap(), ts(100, "p1"))
                .unwrap();
        }

        let mut heavy = Claim::new("heavy".into(), "tenant-a".into(), (0, 1000), 0, ts(101, "p1"));
        heavy.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 3), ts(101, "p1"));
        model.submit_claim(heavy).unwrap();

        let mut light = Claim::new("light".into(), "tenant-b".into(), (0, 1000), 0, ts(102, "p1"));
        light.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 1), ts(102, "p1"));
        model.submit_claim(light).unwrap();

        let order = rank_pending(&model);
        assert_eq!(order, vec!["light".to_string(), "heavy".to_string()]);
    }

    #[test]
    fn higher_share_tenant_ranks_first_despite_heavier_request() {
        let mut model = ResourceModel::new(1);
        for i in 0..16 {
            model
                .upsert_resource(&format!("r{i}"), ResourceKind::Compute, cap(), ts(100, "p1"))
                .unwrap();
        }
        model.set_tenant_share("tenant-lo", 1, ts(100, "p1"));
        model.set_tenant_share("tenant-hi", 3, ts(100, "p1"));

        let mut lo = Claim::new("lo".into(), "tenant-lo".into(), (0, 1000), 0, ts(101, "p1"));
        lo.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 8), ts(101, "p1"));
        model.submit_claim(lo).unwrap();

        let mut hi = Claim::new("hi".into(), "tenant-hi".into(), (0, 1000), 0, ts(102, "p1"));
        hi.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 16), ts(102, "p1"));
        model.submit_claim(hi).unwrap();

        // tenant-lo: 8/16 / 1 = 0.5; tenant-hi: 16/16 / 3 = 0.333 — the
        // bigger share outweighs the bigger raw request.
        let order = rank_pending(&model);
        assert_eq!(order, vec!["hi".to_string(), "lo".to_string()]);
    }

    #[test]
    fn ties_within_a_tenant_break_on_priority_then_start_then_id() {
        let mut model = ResourceModel::new(1);
        model.upsert_resource("r0", ResourceKind::Compute, cap(), ts(100, "p1")).unwrap();

        let mut low_pri = Claim::new("b".into(), "tenant-a".into(), (50, 1000), 0, ts(101, "p1"));
        low_pri.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 1), ts(101, "p1"));
        model.submit_claim(low_pri).unwrap();

        let mut high_pri = Claim::new("a".into(), "tenant-a".into(), (10, 1000), 5, ts(102, "p1"));
        high_pri.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 1), ts(102, "p1"));
        model.submit_claim(high_pri).unwrap();

        let order = rank_pending(&model);
        assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
    }
}
