//! Availability oracle (spec §4.5): given `(kind, attrs, window, quantity)`,
//! report the maximum achievable quantity and the first window start at
//! which the full quantity is achievable.

use std::collections::{BTreeSet, HashMap};

use crate::model::{Claim, ClaimStatus, Resource, ResourceKind, ResourceModel};

/// Result of an availability query against the current merged state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityReport {
    pub max_achievable: u64,
    /// `None` if the full quantity was not reachable within the bounded
    /// search (see [`first_available_window`]).
    pub first_window_start: Option<i64>,
}

/// How many future candidate start times [`first_available_window`] tries
/// before giving up. Keeps the oracle's cost bounded regardless of how
/// fragmented the booking calendar is, matching the "every operation
/// carries a deadline" discipline in spec §5.
const MAX_CANDIDATE_STARTS: usize = 64;

fn attr_matches(resource: &Resource, required_attrs: &BTreeSet<String>) -> bool {
    let attrs = resource.attributes.value();
    required_attrs.iter().all(|req| match req.split_once('=') {
        Some((k, v)) => attrs.get(k).is_some_and(|existing| existing == v),
        None => attrs.contains_key(req),
    })
}

fn windows_overlap(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Every resource id's currently-booked windows, drawn from every
/// non-terminal `placed` claim (ordinary or maintenance — both occupy the
/// resource, spec §4.5). `exclude_claim_id` omits one claim's own bookings,
/// so re-running admission/placement for that claim does not treat its own
/// prior assignment as a conflict (spec §4.5 idempotency).
fn resource_bookings(model: &ResourceModel, exclude_claim_id: Option<&str>) -> HashMap<String, Vec<(i64, i64)>> {
    let mut bookings: HashMap<String, Vec<(i64, i64)>> = HashMap::new();
    for claim in model.claims() {
        if Some(claim.id.as_str()) == exclude_claim_id {
            continue;
        }
        if claim.status.value() != ClaimStatus::Placed {
            continue;
        }
        let window = claim.window.value();
        for resource_ids in claim.placements.value().values() {
            for resource_id in resource_ids {
                bookings.entry(resource_id.clone()).or_default().push(window);
            }
        }
    }
    bookings
}

fn candidate_resources<'a>(
    model: &'a ResourceModel,
    kind: ResourceKind,
    required_attrs: &BTreeSet<String>,
    now_ms: i64,
) -> Vec<&'a Resource> {
    model
        .resources()
        .filter(|r| r.kind == kind)
        .filter(|r| r.state.value() == crate::model::ResourceState::Active)
        .filter(|r| !r.in_cooldown(now_ms))
        .filter(|r| attr_matches(r, required_attrs))
        .collect()
}

/// How many of the candidate resources are free throughout `window`.
fn achievable_in_window(
    candidates: &[&Resource],
    bookings: &HashMap<String, Vec<(i64, i64)>>,
    window: (i64, i64),
) -> u64 {
    candidates
        .iter()
        .filter(|r| {
            bookings
                .get(&r.id)
                .map_or(true, |busy| !busy.iter().any(|b| windows_overlap(*b, window)))
        })
        .count() as u64
}

/// The availability report for `quantity` units of `kind` matching
/// `required_attrs` over `window`, searching forward from `window.0` for the
/// first point the full quantity is reachable (spec §4.5 "first window
/// start"). Deterministic given identical merged state, since candidate
/// start times are derived purely from recorded bookings.
pub fn query(
    model: &ResourceModel,
    kind: ResourceKind,
    required_attrs: &BTreeSet<String>,
    window: (i64, i64),
    quantity: u64,
    now_ms: i64,
    exclude_claim_id: Option<&str>,
) -> AvailabilityReport {
    let candidates = candidate_resources(model, kind, required_attrs, now_ms);
    let bookings = resource_bookings(model, exclude_claim_id);
    let duration = window.1 - window.0;

    let max_achievable = achievable_in_window(&candidates, &bookings, window);
    if max_achievable >= quantity {
        return AvailabilityReport {
            max_achievable,
            first_window_start: Some(window.0),
        };
    }

    let mut starts: BTreeSet<i64> = bookings
        .values()
        .flatten()
        .map(|(_, end)| *end)
        .filter(|end| *end > window.0)
        .collect();
    starts.insert(window.0);

    for start in starts.into_iter().take(MAX_CANDIDATE_STARTS) {
        let candidate_window = (start, start + duration);
        if achievable_in_window(&candidates, &bookings, candidate_window) >= quantity {
            return AvailabilityReport {
                max_achievable,
                first_window_start: Some(start),
            };
        }
    }

    AvailabilityReport {
        max_achievable,
        first_window_start: None,
    }
}

/// Resources available for `profile` (see [`crate::model::ResourceProfile`])
/// over `window`, sorted by current load ascending then id, for the greedy
/// placement pass in [`super::placement`].
pub(super) fn sorted_candidates<'a>(
    model: &'a ResourceModel,
    kind: ResourceKind,
    required_attrs: &BTreeSet<String>,
    window: (i64, i64),
    now_ms: i64,
    exclude_claim_id: Option<&str>,
) -> Vec<&'a Resource> {
    let bookings = resource_bookings(model, exclude_claim_id);
    let mut candidates: Vec<&Resource> = candidate_resources(model, kind, required_attrs, now_ms)
        .into_iter()
        .filter(|r| {
            bookings
                .get(&r.id)
                .map_or(true, |busy| !busy.iter().any(|b| windows_overlap(*b, window)))
        })
        .collect();
    candidates.sort_by_key(|r| (bookings.get(&r.id).map(|b| b.len()).unwrap_or(0), r.id.clone()));
    candidates
}

pub(super) fn claims_for_tenant<'a>(model: &'a ResourceModel, tenant: &str) -> impl Iterator<Item = &'a Claim> {
    model.claims().filter(move |c| c.tenant == tenant)
}
