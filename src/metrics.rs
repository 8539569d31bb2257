//! Prometheus metrics for latticed.
//!
//! Exposed on the HTTP observability surface (`/metrics`) alongside
//! `/healthz`. Tracks gossip throughput, admission/placement outcomes, and
//! store durability, mirroring the counters+gauges split of slircd-ng's own
//! metrics module.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    /// CRDT deltas sent to peers, total.
    pub static ref DELTAS_SENT: IntCounter = IntCounter::new(
        "latticed_deltas_sent_total",
        "Total CRDT deltas sent to peers"
    ).unwrap();

    /// CRDT deltas received from peers, total.
    pub static ref DELTAS_RECEIVED: IntCounter = IntCounter::new(
        "latticed_deltas_received_total",
        "Total CRDT deltas received from peers"
    ).unwrap();

    /// Sync envelopes rejected for authentication reasons, by code.
    pub static ref SYNC_AUTH_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("latticed_sync_auth_failures_total", "Sync envelopes rejected at the auth layer"),
        &["reason"],
    ).unwrap();

    /// Remote timestamps rejected for exceeding the configured clock skew bound.
    pub static ref CLOCK_SKEW_REJECTIONS: IntCounter = IntCounter::new(
        "latticed_clock_skew_rejections_total",
        "Remote timestamps rejected for excessive clock skew"
    ).unwrap();

    /// Claims by terminal/transition outcome.
    pub static ref CLAIMS_ADMITTED: IntCounter = IntCounter::new(
        "latticed_claims_admitted_total",
        "Claims admitted by the fair-share scheduler"
    ).unwrap();
    pub static ref CLAIMS_REJECTED: IntCounter = IntCounter::new(
        "latticed_claims_rejected_total",
        "Claims rejected at admission or placement"
    ).unwrap();
    pub static ref CLAIMS_PLACED: IntCounter = IntCounter::new(
        "latticed_claims_placed_total",
        "Claims successfully placed onto resources"
    ).unwrap();
    pub static ref CLAIMS_EXPIRED: IntCounter = IntCounter::new(
        "latticed_claims_expired_total",
        "Claims expired past their reservation window"
    ).unwrap();

    /// Store snapshot writes, total.
    pub static ref SNAPSHOT_WRITES: IntCounter = IntCounter::new(
        "latticed_snapshot_writes_total",
        "Store snapshots written to the persistence backend"
    ).unwrap();

    /// Resources tombstoned for missing `grace_interval_pushes`
    /// consecutive controller inventory pushes.
    pub static ref CONTROLLER_RESOURCES_TOMBSTONED: IntCounter = IntCounter::new(
        "latticed_controller_resources_tombstoned_total",
        "Resources tombstoned after missing consecutive inventory pushes"
    ).unwrap();

    /// `placement_hook` calls that returned an error, causing the claim to
    /// revert to `admitted` and its resources to cool off.
    pub static ref CONTROLLER_PLACEMENT_FAILURES: IntCounter = IntCounter::new(
        "latticed_controller_placement_failures_total",
        "placement_hook calls that errored and reverted their claim"
    ).unwrap();

    // ------------------------------------------------------------------
    // Gauges
    // ------------------------------------------------------------------

    /// Peers currently in the Synced handshake state.
    pub static ref PEERS_SYNCED: IntGauge = IntGauge::new(
        "latticed_peers_synced",
        "Peers currently in the Synced handshake state"
    ).unwrap();

    /// Claims currently pending admission.
    pub static ref CLAIMS_PENDING: IntGauge = IntGauge::new(
        "latticed_claims_pending",
        "Claims currently awaiting admission"
    ).unwrap();
}

static INIT: std::sync::Once = std::sync::Once::new();

/// Registers every metric with [`REGISTRY`]. Safe to call more than once
/// (e.g. from multiple tests in the same process); only the first call
/// registers.
pub fn init() {
    INIT.call_once(|| register_all());
}

fn register_all() {
    REGISTRY.register(Box::new(DELTAS_SENT.clone())).unwrap();
    REGISTRY
        .register(Box::new(DELTAS_RECEIVED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SYNC_AUTH_FAILURES.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CLOCK_SKEW_REJECTIONS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CLAIMS_ADMITTED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CLAIMS_REJECTED.clone()))
        .unwrap();
    REGISTRY.register(Box::new(CLAIMS_PLACED.clone())).unwrap();
    REGISTRY
        .register(Box::new(CLAIMS_EXPIRED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SNAPSHOT_WRITES.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CONTROLLER_RESOURCES_TOMBSTONED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CONTROLLER_PLACEMENT_FAILURES.clone()))
        .unwrap();
    REGISTRY.register(Box::new(PEERS_SYNCED.clone())).unwrap();
    REGISTRY
        .register(Box::new(CLAIMS_PENDING.clone()))
        .unwrap();
}

/// Records a sync auth failure under `reason` (an [`crate::error::SyncAuthError::error_code`]).
pub fn record_sync_auth_failure(reason: &str) {
    SYNC_AUTH_FAILURES.with_label_values(&[reason]).inc();
}

/// Gathers all registered metrics, encoded in Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_free_and_gather_produces_text() {
        init();
        record_sync_auth_failure("bad_hmac");
        let text = gather();
        assert!(text.contains("latticed_sync_auth_failures_total"));
    }
}
