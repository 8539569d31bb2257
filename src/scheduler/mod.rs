//! Fair-Share Scheduler (C5): admission, placement, and the availability
//! oracle described in spec §4.5. Grounded in the teacher's error-taxonomy
//! and tracing conventions (`src/error.rs`, span-per-operation logging);
//! the admission/placement algorithms themselves have no direct analogue in
//! the teacher (an IRC daemon has no reservation scheduler) and are
//! engineered straight from the specification, recorded in DESIGN.md.

pub mod availability;
pub mod drf;
pub mod placement;

use std::time::{Duration, Instant};

use lattice_crdt::HybridClock;

pub use availability::{query as availability_query, AvailabilityReport};

use crate::error::CapacityError;
use crate::model::{ClaimStatus, ResourceModel};
use crate::telemetry::DecisionTimer;

/// Outcome of one claim's admission attempt during a [`Scheduler::run_admission_pass`].
#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    pub claim_id: String,
    pub result: Result<(), CapacityError>,
}

/// Drives the C5 state machine over a [`ResourceModel`]. Holds only policy
/// parameters; all actual state lives in the model, so a `Scheduler` is
/// cheap to construct and safe to share (it has no interior mutability of
/// its own).
pub struct Scheduler {
    admission_deadline: Duration,
}

impl Scheduler {
    pub fn new(admission_deadline: Duration) -> Self {
        Self { admission_deadline }
    }

    /// Rank every pending claim by dominant-share ratio (spec §4.5) and
    /// attempt to admit each in turn. Admission here means "capacity exists
    /// to eventually place the claim somewhere in its window" — the
    /// `availability` oracle — not the placement itself, which happens
    /// separately via [`Self::place_claim`] once a claim is admitted.
    /// Maintenance claims bypass ranking entirely: they don't consume
    /// tenant share and are admitted immediately if the resources they name
    /// are available (spec §4.5 "Maintenance events... do not consume
    /// share").
    pub fn run_admission_pass(&self, model: &mut ResourceModel, clock: &HybridClock, now_ms: i64) -> Vec<AdmissionOutcome> {
        let _timer = DecisionTimer::new("admission");
        let start = Instant::now();
        let mut outcomes = Vec::new();

        let maintenance_ids: Vec<String> = model
            .claims()
            .filter(|c| c.status.value() == ClaimStatus::Pending && c.is_maintenance())
            .map(|c| c.id.clone())
            .collect();
        let ranked = drf::rank_pending(model);

        for claim_id in maintenance_ids.into_iter().chain(ranked) {
            if start.elapsed() > self.admission_deadline {
                tracing::warn!(claim_id = %claim_id, "admission deadline exceeded, claim remains pending");
                outcomes.push(AdmissionOutcome {
                    claim_id,
                    result: Err(CapacityError::DeadlineExceeded),
                });
                continue;
            }
            let result = self.try_admit_one(model, &claim_id, clock, now_ms);
            outcomes.push(AdmissionOutcome { claim_id, result });
        }
        outcomes
    }

    fn try_admit_one(&self, model: &mut ResourceModel, claim_id: &str, clock: &HybridClock, now_ms: i64) -> Result<(), CapacityError> {
        let claim = model.claim(claim_id).expect("claim_id came from this model");
        let window = claim.window.value();
        let profiles = claim.profiles.value();

        for profile in &profiles {
            let report = availability::query(
                model,
                profile.kind,
                &profile.required_attrs,
                window,
                profile.quantity,
                now_ms,
                Some(claim_id),
            );
            if report.first_window_start != Some(window.0) {
                let err = if report.max_achievable == 0 {
                    CapacityError::NoMatchingResources {
                        kind: profile.kind.as_str().to_string(),
                    }
                } else {
                    CapacityError::InsufficientQuantity {
                        requested: profile.quantity,
                        available: report.max_achievable,
                    }
                };
                let ts = clock.now();
                let claim = model.claim_mut(claim_id).expect("claim_id still exists");
                claim.status.update(ClaimStatus::Rejected, ts.clone());
                claim.last_error.update(Some(err.to_string()), ts);
                return Err(err);
            }
        }

        let ts = clock.now();
        let claim = model.claim_mut(claim_id).expect("claim_id still exists");
        claim.status.update(ClaimStatus::Admitted, ts.clone());
        claim.admit_ts.update(Some(ts.clone()), ts);
        tracing::info!(claim_id, "claim admitted");
        Ok(())
    }

    /// Place every profile of an admitted claim onto concrete resources
    /// (spec §4.5 "Placement"). Delegates to [`placement::place_claim`].
    pub fn place_claim(&self, model: &mut ResourceModel, claim_id: &str, clock: &HybridClock, now_ms: i64) -> Result<(), CapacityError> {
        let _timer = DecisionTimer::new("placement");
        placement::place_claim(model, claim_id, clock, now_ms)
    }

    /// `placed -> expired` when `end_ms` has passed (spec §4.5 state
    /// machine). Returns the ids transitioned.
    pub fn expire_claims(&self, model: &mut ResourceModel, clock: &HybridClock, now_ms: i64) -> Vec<String> {
        let due: Vec<String> = model
            .claims()
            .filter(|c| c.status.value() == ClaimStatus::Placed && c.window.value().1 <= now_ms)
            .map(|c| c.id.clone())
            .collect();
        for id in &due {
            let ts = clock.now();
            model.claim_mut(id).expect("id came from this model").status.update(ClaimStatus::Expired, ts);
        }
        due
    }

    /// After a merge, two peers may have both admitted or placed
    /// overlapping claims against the same resource. Resolve by keeping the
    /// claim with the smaller `(admit_timestamp, claim_id)` tuple and
    /// reverting the other to `pending` with its placements cleared, for
    /// re-evaluation on the next admission pass (spec §4.5 "Failure
    /// semantics").
    pub fn reconcile_admission_conflicts(&self, model: &mut ResourceModel, clock: &HybridClock) {
        let mut resource_claims: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        for claim in model.claims() {
            if claim.is_maintenance() || claim.status.value() != ClaimStatus::Placed {
                continue;
            }
            for resource_ids in claim.placements.value().values() {
                for resource_id in resource_ids {
                    resource_claims.entry(resource_id.clone()).or_default().push(claim.id.clone());
                }
            }
        }

        let mut losers: std::collections::HashSet<String> = std::collections::HashSet::new();
        for claim_ids in resource_claims.values() {
            if claim_ids.len() < 2 {
                continue;
            }
            let mut ranked: Vec<&String> = claim_ids.iter().collect();
            ranked.sort_by_key(|id| {
                let claim = model.claim(id).expect("id came from this model");
                (claim.admit_ts.value(), claim.id.clone())
            });
            for id in ranked.into_iter().skip(1) {
                losers.insert(id.clone());
            }
        }

        for id in losers {
            let ts = clock.now();
            let claim = model.claim_mut(&id).expect("id came from this model");
            tracing::warn!(claim_id = %id, "reverting to pending after admission conflict");
            claim.status.update(ClaimStatus::Pending, ts.clone());
            claim.admit_ts.update(None, ts.clone());
            let profile_ids: Vec<String> = claim.placements.value().keys().cloned().collect();
            for profile_id in profile_ids {
                claim.placements.remove(&profile_id, ts.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CapacityVector, Claim, ResourceKind, ResourceProfile, MAINTENANCE_TENANT};
    use lattice_crdt::PeerId;

    fn cap() -> CapacityVector {
        [("cpu".to_string(), 1.0), ("memory".to_string(), 1.0)].into_iter().collect()
    }

    #[test]
    fn admits_and_places_a_fitting_claim() {
        let clock = HybridClock::new(PeerId::new("p1"));
        let scheduler = Scheduler::new(Duration::from_millis(250));
        let mut model = ResourceModel::new(1);
        model.upsert_resource("r1", ResourceKind::Compute, cap(), clock.now()).unwrap();

        let mut claim = Claim::new("c1".into(), "tenant-a".into(), (0, 1000), 0, clock.now());
        claim.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 1), clock.now());
        model.submit_claim(claim).unwrap();

        let outcomes = scheduler.run_admission_pass(&mut model, &clock, 0);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(model.claim_view("c1").unwrap().status, ClaimStatus::Admitted);

        scheduler.place_claim(&mut model, "c1", &clock, 0).unwrap();
        assert_eq!(model.claim_view("c1").unwrap().status, ClaimStatus::Placed);
    }

    #[test]
    fn rejects_when_pool_is_too_small() {
        let clock = HybridClock::new(PeerId::new("p1"));
        let scheduler = Scheduler::new(Duration::from_millis(250));
        let mut model = ResourceModel::new(1);
        model.upsert_resource("r1", ResourceKind::Compute, cap(), clock.now()).unwrap();

        let mut claim = Claim::new("c1".into(), "tenant-a".into(), (0, 1000), 0, clock.now());
        claim.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 5), clock.now());
        model.submit_claim(claim).unwrap();

        let outcomes = scheduler.run_admission_pass(&mut model, &clock, 0);
        assert!(outcomes[0].result.is_err());
        assert_eq!(model.claim_view("c1").unwrap().status, ClaimStatus::Rejected);
    }

    #[test]
    fn expire_transitions_placed_claims_past_their_window() {
        let clock = HybridClock::new(PeerId::new("p1"));
        let scheduler = Scheduler::new(Duration::from_millis(250));
        let mut model = ResourceModel::new(1);
        model.upsert_resource("r1", ResourceKind::Compute, cap(), clock.now()).unwrap();

        let mut claim = Claim::new("c1".into(), "tenant-a".into(), (0, 100), 0, clock.now());
        claim.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 1), clock.now());
        model.submit_claim(claim).unwrap();
        scheduler.run_admission_pass(&mut model, &clock, 0);
        scheduler.place_claim(&mut model, "c1", &clock, 0).unwrap();

        let expired = scheduler.expire_claims(&mut model, &clock, 200);
        assert_eq!(expired, vec!["c1".to_string()]);
        assert_eq!(model.claim_view("c1").unwrap().status, ClaimStatus::Expired);
    }

    #[test]
    fn maintenance_claim_is_admitted_without_consuming_share() {
        let clock = HybridClock::new(PeerId::new("p1"));
        let scheduler = Scheduler::new(Duration::from_millis(250));
        let mut model = ResourceModel::new(1);
        model.upsert_resource("r1", ResourceKind::Compute, cap(), clock.now()).unwrap();

        let mut maint = Claim::new("m1".into(), MAINTENANCE_TENANT.into(), (0, 1000), 0, clock.now());
        maint.add_profile(ResourceProfile::new("p", ResourceKind::Compute, 1), clock.now());
        model.submit_claim(maint).unwrap();

        let outcomes = scheduler.run_admission_pass(&mut model, &clock, 0);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(model.claim_view("m1").unwrap().status, ClaimStatus::Admitted);
    }
}
