//! Controller Contract (C7, spec §4.7): the abstract surface provider
//! adapters implement so the core can pull inventory and push placement
//! outcomes without depending on any concrete provider SDK.
//!
//! Grounded in the teacher's `HistoryProvider` trait
//! (`src/history/mod.rs`): an `async_trait` object behind `Arc<dyn _>`,
//! errors shared with the rest of the core's `thiserror` taxonomy, and a
//! no-op implementation ([`NoopAdapter`], mirroring
//! `history::noop::NoOpProvider`) for deployments with nothing to wire in
//! yet. No wire format is mandated here — per spec §4.7, adapters live in
//! the same process as the core.

pub mod noop;
pub mod runner;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ControllerError;
use crate::model::{CapacityVector, ClaimView, ResourceKind};

pub use noop::NoopAdapter;
pub use runner::ControllerRunner;

/// One resource as reported by a provider's inventory pull, prior to
/// being written into the shared model by `inventory_push` (spec §4.7).
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub id: String,
    pub kind: ResourceKind,
    pub capacity: CapacityVector,
    pub attributes: HashMap<String, String>,
}

impl ResourceSpec {
    pub fn new(id: impl Into<String>, kind: ResourceKind, capacity: CapacityVector) -> Self {
        Self {
            id: id.into(),
            kind,
            capacity,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Implemented once per provider (cloud API, hypervisor, bare-metal
/// fleet manager, ...). The core depends only on this trait, never on a
/// concrete provider SDK.
#[async_trait]
pub trait ControllerAdapter: Send + Sync {
    /// Tag written to every `Resource.origin` this adapter pushes, and
    /// used to scope grace-interval tombstoning to this adapter's slice.
    fn origin(&self) -> &str;

    /// Cadence at which [`ControllerRunner`] should call [`Self::pull`].
    fn pull_interval(&self) -> Duration;

    /// Fetches the provider's current view of its resources in
    /// `datacenter_id` (spec §4.7 `inventory_push`'s source data).
    async fn pull(&self, datacenter_id: &str) -> Result<Vec<ResourceSpec>, ControllerError>;

    /// Fired when a claim enters `placed`, so the adapter can perform
    /// provider-side actions (out of scope for the core). An error
    /// reverts the claim to `admitted` and cools off every resource named
    /// in `placements` (spec §4.7).
    async fn placement_hook(
        &self,
        claim: &ClaimView,
        placements: &HashMap<String, std::collections::BTreeSet<String>>,
    ) -> Result<(), ControllerError>;
}
