//! Drives one [`ControllerAdapter`] against the shared model: periodic
//! inventory pulls with grace-interval tombstoning, and placement-hook
//! dispatch with claim revert + cool-off on error (spec §4.7).
//!
//! Grounded in the same "one async task polls a trait object on a
//! cadence" shape the teacher uses for its history pruning sweep
//! (`src/history/mod.rs` callers), generalized from a single fixed
//! retention sweep into a per-adapter pull/hook pair.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;

use lattice_crdt::HybridClock;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics;
use crate::model::{ClaimStatus, ResourceModel, ResourceState};

use super::ControllerAdapter;

pub struct ControllerRunner {
    adapter: Arc<dyn ControllerAdapter>,
    datacenter_id: String,
    grace_interval_pushes: u32,
    cooloff_ms: i64,
    state: Arc<RwLock<ResourceModel>>,
    clock: Arc<HybridClock>,
    miss_counts: DashMap<String, u32>,
    hooked: DashSet<String>,
}

impl ControllerRunner {
    pub fn new(
        adapter: Arc<dyn ControllerAdapter>,
        datacenter_id: impl Into<String>,
        config: &ControllerConfig,
        state: Arc<RwLock<ResourceModel>>,
        clock: Arc<HybridClock>,
    ) -> Self {
        Self {
            adapter,
            datacenter_id: datacenter_id.into(),
            grace_interval_pushes: config.grace_interval_pushes,
            cooloff_ms: (config.cooloff_secs as i64) * 1000,
            state,
            clock,
            miss_counts: DashMap::new(),
            hooked: DashSet::new(),
        }
    }

    pub fn pull_interval(&self) -> Duration {
        self.adapter.pull_interval()
    }

    /// One `inventory_push` cycle (spec §4.7): pulls the provider's
    /// current slice, replaces it wholesale in the model, and bumps the
    /// miss count of any previously-seen id absent from this push. An id
    /// absent for `grace_interval_pushes` consecutive cycles is
    /// tombstoned by setting its state to `Offline` — the model's
    /// resources map carries no separate deletion marker (spec's open
    /// question on tombstone GC defaults to "never"), and `Offline`
    /// already excludes a resource from every placement query
    /// (`scheduler::availability::candidate_resources`), which is the
    /// only externally visible effect tombstoning needs to have.
    pub async fn run_pull(&self) -> Result<(), ControllerError> {
        let specs = self.adapter.pull(&self.datacenter_id).await?;
        let origin = self.adapter.origin().to_string();
        let ts = self.clock.now();

        let previously_known: HashSet<String> = self.state.read().resource_ids_with_origin(&origin).into_iter().collect();

        let resources = specs.into_iter().map(|s| (s.id, s.kind, s.capacity, s.attributes)).collect::<Vec<_>>();
        let seen: HashSet<String> = {
            let mut state = self.state.write();
            state
                .inventory_push(&origin, resources, ts)
                .map_err(|e| ControllerError(e.to_string()))?
                .into_iter()
                .collect()
        };

        for id in &seen {
            self.miss_counts.remove(id);
        }
        for id in previously_known.difference(&seen) {
            let misses = {
                let mut entry = self.miss_counts.entry(id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if misses >= self.grace_interval_pushes {
                let mut state = self.state.write();
                if state.set_resource_state(id, ResourceState::Offline, self.clock.now()).is_ok() {
                    metrics::CONTROLLER_RESOURCES_TOMBSTONED.inc();
                    tracing::warn!(resource = %id, origin = %origin, "tombstoning resource absent from inventory push");
                }
                self.miss_counts.remove(id);
            }
        }
        Ok(())
    }

    /// Runs `placement_hook` for every currently-`placed` claim not yet
    /// hooked. On error, reverts the claim to `admitted` and cools off
    /// every resource named in its placements (spec §4.7).
    pub async fn run_placement_hooks(&self) {
        let candidates: Vec<crate::model::ClaimView> = self
            .state
            .read()
            .claims()
            .filter(|c| c.status.value() == ClaimStatus::Placed && !self.hooked.contains(&c.id))
            .map(|c| c.view())
            .collect();

        for view in candidates {
            match self.adapter.placement_hook(&view, &view.placements).await {
                Ok(()) => {
                    self.hooked.insert(view.id);
                }
                Err(e) => {
                    tracing::warn!(claim = %view.id, error = %e, "placement_hook failed, reverting claim");
                    let now = self.clock.now();
                    let until = now.wall_ms + self.cooloff_ms;
                    let mut state = self.state.write();
                    if let Some(claim) = state.claim_mut(&view.id) {
                        claim.status.update(ClaimStatus::Admitted, now.clone());
                    }
                    for rid in view.placements.values().flatten() {
                        let _ = state.cool_off_resource(rid, until, self.clock.now());
                    }
                    metrics::CONTROLLER_PLACEMENT_FAILURES.inc();
                }
            }
        }
    }
}
