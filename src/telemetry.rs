//! Structured tracing context for gossip and scheduling operations.
//!
//! `SyncTraceContext` plays the role slircd-ng's `IrcTraceContext` plays for
//! IRC commands: a builder that accumulates the attributes of one logical
//! operation (which peer, which envelope kind, which claim) so they show up
//! as structured fields on the enclosing span rather than scattered across
//! log lines.

use std::time::Instant;
use tracing::{span, Level, Span};

#[derive(Debug, Clone, Default)]
pub struct SyncTraceContext {
    pub peer_id: Option<String>,
    pub envelope_kind: Option<&'static str>,
    pub op_count: Option<usize>,
    pub claim_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl SyncTraceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn with_envelope_kind(mut self, kind: &'static str) -> Self {
        self.envelope_kind = Some(kind);
        self
    }

    pub fn with_op_count(mut self, count: usize) -> Self {
        self.op_count = Some(count);
        self
    }

    pub fn with_claim_id(mut self, claim_id: impl Into<String>) -> Self {
        self.claim_id = Some(claim_id.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn into_span(self) -> Span {
        span!(
            Level::DEBUG,
            "sync",
            peer_id = self.peer_id.as_deref(),
            envelope_kind = self.envelope_kind,
            op_count = self.op_count,
            claim_id = self.claim_id.as_deref(),
            tenant_id = self.tenant_id.as_deref(),
        )
    }
}

/// Guard that records admission/placement latency into the scheduler's
/// duration histogram-equivalent (a counter plus a logged duration, since
/// the metric surface only needs p50-by-eyeball today) on drop.
pub struct DecisionTimer {
    stage: &'static str,
    start: Instant,
}

impl DecisionTimer {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for DecisionTimer {
    fn drop(&mut self) {
        tracing::debug!(
            stage = self.stage,
            elapsed_secs = self.elapsed_secs(),
            "scheduler decision"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_context_builder_sets_fields() {
        let ctx = SyncTraceContext::new()
            .with_peer_id("peer-b")
            .with_envelope_kind("DELTA")
            .with_op_count(3);

        assert_eq!(ctx.peer_id.as_deref(), Some("peer-b"));
        assert_eq!(ctx.envelope_kind, Some("DELTA"));
        assert_eq!(ctx.op_count, Some(3));
    }

    #[test]
    fn decision_timer_measures_elapsed() {
        let timer = DecisionTimer::new("admission");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_secs() >= 0.005);
    }
}
