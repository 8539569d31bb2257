//! Per-peer connection state, grounded in the teacher's `HandshakeState` /
//! `LinkState` (`src/sync/handshake.rs`, `src/sync/link.rs`), specialized
//! from the teacher's PASS/SERVER/BURST handshake to this protocol's
//! HELLO/DELTA/SNAPSHOT exchange (spec §4.6).

use std::collections::VecDeque;
use std::time::Instant;

use lattice_crdt::{HybridTimestamp, PeerId};
use tokio::sync::mpsc;

use crate::sync::envelope::Envelope;

/// `Unconnected -> Handshaking -> Bursting -> Synced` (spec §4.6
/// "Topology"/"Protocol"). A link regresses to `Unconnected` on transport
/// failure and re-enters this state machine from the top on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live socket to this peer.
    Unconnected,
    /// Socket open, HELLO sent or received but not yet both.
    Handshaking,
    /// HELLO exchanged; catching up on deltas newer than the peer's
    /// `last_seen_ts_per_peer`, or transferring a full snapshot.
    Bursting,
    /// Caught up; steady-state delta exchange.
    Synced,
}

/// Live state for one peer connection: the outbound send half, handshake
/// progress, and the backpressure queue described in spec §4.6
/// "Backpressure and batching".
pub struct PeerLink {
    pub peer_id: PeerId,
    pub host_id: String,
    pub tx: mpsc::Sender<Envelope>,
    pub state: ConnectionState,
    pub connected_at: Instant,
    pub last_seen: Instant,
    /// Highest timestamp this peer is already known to have seen, per
    /// origin peer (from its own HELLO / observed deltas). Drives what a
    /// flush needs to (re)send.
    pub last_seen_ts_per_peer: std::collections::HashMap<String, HybridTimestamp>,
    /// Deltas queued for this peer, not yet flushed.
    pub pending: VecDeque<crate::wire::DeltaOp>,
    pub last_flush: Instant,
}

impl PeerLink {
    pub fn new(peer_id: PeerId, host_id: String, tx: mpsc::Sender<Envelope>) -> Self {
        let now = Instant::now();
        Self {
            peer_id,
            host_id,
            tx,
            state: ConnectionState::Handshaking,
            connected_at: now,
            last_seen: now,
            last_seen_ts_per_peer: std::collections::HashMap::new(),
            pending: VecDeque::new(),
            last_flush: now,
        }
    }

    /// `(now - last_flush) > sync_delta OR queue_size > sync_max` (spec
    /// §4.6 "Backpressure and batching").
    pub fn flush_due(&self, sync_delta: std::time::Duration, sync_max: u64) -> bool {
        self.last_flush.elapsed() > sync_delta || self.pending.len() as u64 > sync_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_link() -> PeerLink {
        let (tx, _rx) = mpsc::channel(8);
        PeerLink::new(PeerId::new("peer-b"), "peer-b.example".into(), tx)
    }

    #[test]
    fn new_link_starts_handshaking() {
        let link = make_link();
        assert_eq!(link.state, ConnectionState::Handshaking);
        assert!(link.pending.is_empty());
    }

    #[test]
    fn flush_due_on_queue_size_threshold() {
        use crate::model::{CapacityVector, Resource, ResourceKind};
        let mut link = make_link();
        for i in 0..5 {
            let cap: CapacityVector = [("cpu".to_string(), 1.0)].into_iter().collect();
            let ts = HybridTimestamp::new(100, i, &PeerId::new("p1"));
            let r = Resource::new(format!("r{i}"), ResourceKind::Compute, cap, ts.clone());
            link.pending.push_back(crate::wire::DeltaOp::new(
                crate::wire::EntityKind::Resource,
                format!("r{i}"),
                ts,
                crate::wire::EntityPayload::Resource(Box::new(r)),
            ));
        }
        assert!(link.flush_due(std::time::Duration::from_secs(3600), 3));
        assert!(!link.flush_due(std::time::Duration::from_secs(3600), 100));
    }
}
