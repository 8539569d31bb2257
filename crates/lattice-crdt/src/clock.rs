//! Hybrid logical clock.
//!
//! Every CRDT mutation is stamped with a [`HybridTimestamp`]: a triple of
//! wall-clock millis, a logical counter, and the originating peer's id.
//! Ordering is lexicographic on the triple, which gives every peer a total
//! order over its own writes and a deterministic tie-break across peers.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable, opaque self-identifier of a gossip peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// `(wall_ms, logical_counter, peer_id)`, ordered lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HybridTimestamp {
    pub wall_ms: i64,
    pub counter: u32,
    pub peer: PeerId,
}

impl HybridTimestamp {
    pub fn new(wall_ms: i64, counter: u32, peer: &PeerId) -> Self {
        Self {
            wall_ms,
            counter,
            peer: peer.clone(),
        }
    }

    /// A timestamp guaranteed to sort before any timestamp a live clock
    /// could ever produce. Used as the sentinel "since the beginning" bound
    /// for `delta()` queries.
    pub const fn epoch(peer: PeerId) -> Self {
        Self {
            wall_ms: i64::MIN,
            counter: 0,
            peer,
        }
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms
            .cmp(&other.wall_ms)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.peer.cmp(&other.peer))
    }
}

struct ClockState {
    last_wall: i64,
    last_counter: u32,
}

/// Per-peer hybrid logical clock. Safe under concurrent callers: all state
/// transitions happen under a single short-held lock.
pub struct HybridClock {
    peer: PeerId,
    state: Mutex<ClockState>,
    wall_source: fn() -> i64,
}

impl HybridClock {
    pub fn new(peer: PeerId) -> Self {
        Self::with_wall_source(peer, default_wall_ms)
    }

    /// Construct with a caller-supplied wall-clock source. Exists so tests
    /// can drive skew and tie-break scenarios deterministically.
    pub fn with_wall_source(peer: PeerId, wall_source: fn() -> i64) -> Self {
        Self {
            peer,
            state: Mutex::new(ClockState {
                last_wall: 0,
                last_counter: 0,
            }),
            wall_source,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    /// Produce the next timestamp for a local mutation. Strictly greater
    /// than every timestamp this clock has previously produced or observed.
    pub fn now(&self) -> HybridTimestamp {
        let wall = (self.wall_source)();
        let mut state = self.state.lock();
        if wall > state.last_wall {
            state.last_wall = wall;
            state.last_counter = 0;
        } else {
            state.last_counter += 1;
        }
        HybridTimestamp::new(state.last_wall, state.last_counter, &self.peer)
    }

    /// Fold in a remote timestamp, advancing local state so that the next
    /// call to `now()` sorts after it. Does not perform the skew rejection
    /// check — callers (the peer sync engine) reject suspicious remote
    /// timestamps before this is ever called.
    pub fn observe(&self, remote: &HybridTimestamp) {
        let wall = (self.wall_source)();
        let mut state = self.state.lock();
        let new_wall = state.last_wall.max(wall).max(remote.wall_ms);
        if new_wall == remote.wall_ms {
            state.last_counter = state.last_counter.max(remote.counter) + 1;
        } else {
            state.last_counter += 1;
        }
        state.last_wall = new_wall;
    }
}

fn default_wall_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering as AtomOrdering};

    static FAKE_WALL: AtomicI64 = AtomicI64::new(1000);

    fn fake_wall() -> i64 {
        FAKE_WALL.load(AtomOrdering::SeqCst)
    }

    #[test]
    fn monotonic_under_same_wall_reading() {
        let clock = HybridClock::with_wall_source(PeerId::new("p1"), fake_wall);
        let a = clock.now();
        let b = clock.now();
        let c = clock.now();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn wall_advance_resets_counter() {
        FAKE_WALL.store(2000, AtomOrdering::SeqCst);
        let clock = HybridClock::with_wall_source(PeerId::new("p1"), fake_wall);
        let a = clock.now();
        FAKE_WALL.store(2001, AtomOrdering::SeqCst);
        let b = clock.now();
        assert_eq!(a.counter, 0);
        assert_eq!(b.counter, 0);
        assert!(a < b);
    }

    #[test]
    fn observe_advances_past_remote() {
        FAKE_WALL.store(3000, AtomOrdering::SeqCst);
        let clock = HybridClock::with_wall_source(PeerId::new("p1"), fake_wall);
        let remote = HybridTimestamp::new(5000, 7, &PeerId::new("p2"));
        clock.observe(&remote);
        let next = clock.now();
        assert!(next > remote);
    }

    #[test]
    fn tie_broken_by_peer_id() {
        let a = HybridTimestamp::new(100, 0, &PeerId::new("alpha"));
        let b = HybridTimestamp::new(100, 0, &PeerId::new("beta"));
        assert!(a < b);
    }
}
