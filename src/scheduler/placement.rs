//! Greedy resource placement (spec §4.5 "Placement"): for every profile in
//! an admitted claim, pick concrete resources satisfying `quantity`,
//! breaking ties by least-loaded then resource id.

use std::collections::BTreeSet;

use lattice_crdt::HybridClock;

use crate::error::CapacityError;
use crate::model::{ClaimStatus, ResourceModel};

use super::availability::sorted_candidates;

/// Attempt to place every profile of `claim_id`. On success, records
/// `profile_id -> resource ids` in the claim's `placements` and advances its
/// status to `placed`. On failure, advances it to `rejected` with a
/// human-readable cause (spec §4.5 "admitted -> rejected if placement fails
/// at activation") and returns the [`CapacityError`].
pub fn place_claim(
    model: &mut ResourceModel,
    claim_id: &str,
    clock: &HybridClock,
    now_ms: i64,
) -> Result<(), CapacityError> {
    let claim = model
        .claim(claim_id)
        .expect("caller guarantees claim_id exists");
    let window = claim.window.value();
    let profiles = claim.profiles.value();

    let mut assignments: Vec<(String, BTreeSet<String>)> = Vec::with_capacity(profiles.len());
    let mut already_taken: BTreeSet<String> = BTreeSet::new();

    for profile in &profiles {
        let candidates = sorted_candidates(model, profile.kind, &profile.required_attrs, window, now_ms, Some(claim_id));
        let mut picked = BTreeSet::new();
        for resource in candidates {
            if picked.len() as u64 == profile.quantity {
                break;
            }
            if already_taken.contains(&resource.id) {
                continue;
            }
            picked.insert(resource.id.clone());
        }
        if (picked.len() as u64) < profile.quantity {
            let err = if picked.is_empty() {
                CapacityError::NoMatchingResources {
                    kind: profile.kind.as_str().to_string(),
                }
            } else {
                CapacityError::InsufficientQuantity {
                    requested: profile.quantity,
                    available: picked.len() as u64,
                }
            };
            let ts = clock.now();
            let claim = model.claim_mut(claim_id).expect("claim_id still exists");
            claim.status.update(ClaimStatus::Rejected, ts.clone());
            claim.last_error.update(Some(err.to_string()), ts);
            return Err(err);
        }
        already_taken.extend(picked.iter().cloned());
        assignments.push((profile.profile_id.clone(), picked));
    }

    let ts = clock.now();
    let claim = model.claim_mut(claim_id).expect("claim_id still exists");
    for (profile_id, resource_ids) in assignments {
        claim.placements.insert(profile_id, resource_ids, ts.clone());
    }
    claim.status.update(ClaimStatus::Placed, ts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CapacityVector, Claim, ResourceKind, ResourceProfile};
    use lattice_crdt::PeerId;

    fn ts(_wall: i64, peer: &str) -> HybridClock {
        HybridClock::new(PeerId::new(peer))
    }

    fn cap() -> CapacityVector {
        [("cpu".to_string(), 1.0), ("memory".to_string(), 1.0)].into_iter().collect()
    }

    #[test]
    fn places_claim_when_enough_resources_are_free() {
        let mut model = ResourceModel::new(1);
        let clock = ts(100, "p1");
        model.upsert_resource("r1", ResourceKind::Compute, cap(), clock.now()).unwrap();
        model.upsert_resource("r2", ResourceKind::Compute, cap(), clock.now()).unwrap();

        let mut claim = Claim::new("c1".into(), "tenant-a".into(), (0, 1000), 0, clock.now());
        claim.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 2), clock.now());
        model.submit_claim(claim).unwrap();
        model.claim_mut("c1").unwrap().status.update(ClaimStatus::Admitted, clock.now());

        place_claim(&mut model, "c1", &clock, 100).unwrap();
        let view = model.claim_view("c1").unwrap();
        assert_eq!(view.status, ClaimStatus::Placed);
        assert_eq!(view.placements.get("p").unwrap().len(), 2);
    }

    #[test]
    fn rejects_when_quantity_cannot_be_met() {
        let mut model = ResourceModel::new(1);
        let clock = ts(100, "p1");
        model.upsert_resource("r1", ResourceKind::Compute, cap(), clock.now()).unwrap();

        let mut claim = Claim::new("c1".into(), "tenant-a".into(), (0, 1000), 0, clock.now());
        claim.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 2), clock.now());
        model.submit_claim(claim).unwrap();
        model.claim_mut("c1").unwrap().status.update(ClaimStatus::Admitted, clock.now());

        let err = place_claim(&mut model, "c1", &clock, 100).unwrap_err();
        assert!(matches!(err, CapacityError::InsufficientQuantity { .. }));
        assert_eq!(model.claim_view("c1").unwrap().status, ClaimStatus::Rejected);
    }
}
