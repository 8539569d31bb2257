//! No-op controller adapter, mirroring the teacher's `NoOpProvider`
//! (`src/history/noop.rs`): every call succeeds and does nothing. Used
//! when a datacenter's resources are managed entirely by hand, or as a
//! placeholder until a real provider adapter is wired in.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;

use super::{ControllerAdapter, ResourceSpec};
use crate::error::ControllerError;
use crate::model::ClaimView;

pub struct NoopAdapter {
    origin: String,
    pull_interval: Duration,
}

impl NoopAdapter {
    pub fn new(origin: impl Into<String>, pull_interval: Duration) -> Self {
        Self {
            origin: origin.into(),
            pull_interval,
        }
    }
}

#[async_trait]
impl ControllerAdapter for NoopAdapter {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn pull_interval(&self) -> Duration {
        self.pull_interval
    }

    async fn pull(&self, _datacenter_id: &str) -> Result<Vec<ResourceSpec>, ControllerError> {
        Ok(Vec::new())
    }

    async fn placement_hook(&self, _claim: &ClaimView, _placements: &HashMap<String, BTreeSet<String>>) -> Result<(), ControllerError> {
        Ok(())
    }
}
