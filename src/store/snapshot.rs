//! Snapshot cadence and startup replay (spec §4.4, §6 "Persistence
//! layout"): full snapshots at bounded cadence, an operation-log tail for
//! warm restart, self-describing metadata.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use lattice_crdt::{HybridTimestamp, PeerId};
use serde::{Deserialize, Serialize};

use super::Store;
use crate::error::StoreError;
use crate::model::ResourceModel;
use crate::wire::DeltaOp;

/// Schema version stamped on every snapshot so a future incompatible
/// on-disk format change can refuse to load (or migrate) rather than
/// silently misinterpret old bytes.
pub const SCHEMA_VERSION: u32 = 1;

/// `meta/self`: who this replica is and what it last persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub peer_id: String,
    pub schema_ver: u32,
    pub last_snapshot_ts: Option<HybridTimestamp>,
}

/// `snapshot/<schema_ver>/<ts>`: the full merged state plus enough metadata
/// to resume cleanly without replaying anything earlier than `high_water`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub schema_ver: u32,
    pub high_water: HybridTimestamp,
    pub state: ResourceModel,
}

/// Drives the snapshot/delta-log cadence described in spec §4.4 over a
/// [`Store`]. Owns no background task itself; `maybe_snapshot` is called by
/// the caller's own write path (mirroring the teacher's fire-and-forget
/// `HistoryProvider::store`, which is also driven by its caller rather than
/// a dedicated timer task).
pub struct Snapshotter {
    store: Arc<dyn Store>,
    peer_id: PeerId,
    interval_ops: u64,
    interval_seconds: i64,
    default_share: u32,
    ops_since_snapshot: AtomicU64,
    last_snapshot_wall_ms: AtomicI64,
}

impl Snapshotter {
    /// `default_share` seeds a cold-start `ResourceModel` (spec §4.5's
    /// fair-share policy, `SchedulerConfig::default_share`) — it has no
    /// effect once a snapshot exists, since the persisted state already
    /// carries whatever shares were live when it was written.
    pub fn new(store: Arc<dyn Store>, peer_id: PeerId, interval_ops: u64, interval_seconds: i64, default_share: u32) -> Self {
        Self {
            store,
            peer_id,
            interval_ops,
            interval_seconds,
            default_share,
            ops_since_snapshot: AtomicU64::new(0),
            last_snapshot_wall_ms: AtomicI64::new(0),
        }
    }

    /// Record that `n` local ops have been applied since the last snapshot,
    /// and append each to the delta log (the "operation log tail" read back
    /// on restart).
    pub async fn record_ops(&self, ops: &[DeltaOp]) -> Result<(), StoreError> {
        for op in ops {
            let key = delta_key(&self.peer_id, op);
            let value = serde_json::to_vec(op).map_err(|e| StoreError::Serialization(e.to_string()))?;
            self.store.put(&key, value).await?;
        }
        self.ops_since_snapshot.fetch_add(ops.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the next call to [`snapshot`] is due, per spec §4.4's "OR of
    /// thresholds" cadence (the same pattern as the sync backpressure
    /// thresholds in §4.6): either enough ops have accumulated, or enough
    /// wall time has elapsed since the last snapshot.
    pub fn is_due(&self, now_ms: i64) -> bool {
        let ops_due = self.ops_since_snapshot.load(Ordering::SeqCst) >= self.interval_ops;
        let last = self.last_snapshot_wall_ms.load(Ordering::SeqCst);
        let time_due = now_ms - last >= self.interval_seconds * 1000;
        ops_due || time_due
    }

    /// Write a full snapshot of `state`, then prune the delta log entries
    /// it now supersedes (everything at or below the new high-water mark).
    pub async fn snapshot(&self, state: &ResourceModel, now_ms: i64) -> Result<(), StoreError> {
        let high_water = state.high_water_mark(self.peer_id.clone());
        let envelope = SnapshotEnvelope {
            schema_ver: SCHEMA_VERSION,
            high_water: high_water.clone(),
            state: state.clone(),
        };
        let snap_key = format!("snapshot/{}/{}", SCHEMA_VERSION, ts_component(&high_water));
        let snap_bytes = serde_json::to_vec(&envelope).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.put(&snap_key, snap_bytes).await?;

        let meta = SnapshotMeta {
            peer_id: self.peer_id.as_str().to_string(),
            schema_ver: SCHEMA_VERSION,
            last_snapshot_ts: Some(high_water.clone()),
        };
        let meta_bytes = serde_json::to_vec(&meta).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.put("meta/self", meta_bytes).await?;

        self.prune_delta_log_up_to(&high_water).await?;

        self.ops_since_snapshot.store(0, Ordering::SeqCst);
        self.last_snapshot_wall_ms.store(now_ms, Ordering::SeqCst);
        Ok(())
    }

    async fn prune_delta_log_up_to(&self, high_water: &HybridTimestamp) -> Result<(), StoreError> {
        let entries = self.store.scan("delta/").await?;
        for (key, value) in entries {
            let op: DeltaOp = match serde_json::from_slice(&value) {
                Ok(op) => op,
                Err(_) => continue,
            };
            if &op.ts <= high_water {
                // A real durable store would expose a delete; `Store` is
                // put/get/scan-only (spec §4.4), so a superseded entry is
                // instead overwritten with a zero-length tombstone value
                // that `load` skips on replay.
                let _ = key;
                self.store.put(&format!("{}", &op_tombstone_key(&op)), Vec::new()).await?;
            }
        }
        Ok(())
    }

    /// Load the most recent snapshot (if any) and replay every delta op
    /// still in the log after it, reproducing spec scenario S6: state after
    /// load equals the snapshot merged with everything in the tail.
    pub async fn load(&self) -> Result<ResourceModel, StoreError> {
        let snapshots = self.store.scan(&format!("snapshot/{}/", SCHEMA_VERSION)).await?;
        let mut state = match snapshots.last() {
            Some((_, bytes)) => {
                let envelope: SnapshotEnvelope =
                    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
                envelope.state
            }
            None => ResourceModel::new(self.default_share),
        };

        let mut deltas: Vec<DeltaOp> = Vec::new();
        for (_, bytes) in self.store.scan("delta/").await? {
            if bytes.is_empty() {
                continue;
            }
            if let Ok(op) = serde_json::from_slice::<DeltaOp>(&bytes) {
                deltas.push(op);
            }
        }
        deltas.sort_by(|a, b| a.ts.cmp(&b.ts));
        for op in deltas {
            state.apply_delta(op);
        }
        Ok(state)
    }
}

fn ts_component(ts: &HybridTimestamp) -> String {
    // Fixed-width, zero-padded wall-clock component keeps snapshot keys in
    // lexicographic == chronological order for `scan`'s ordered results.
    // Assumes non-negative wall-clock milliseconds, true for any real clock.
    format!("{:020}-{:010}", ts.wall_ms, ts.counter)
}

fn delta_key(peer: &PeerId, op: &DeltaOp) -> String {
    format!("delta/{}/{}-{}", peer.as_str(), ts_component(&op.ts), op.entity_id)
}

fn op_tombstone_key(op: &DeltaOp) -> String {
    // Re-derive the same key shape `record_ops` used; tombstoning overwrites
    // in place rather than allocating a new key.
    format!("delta/{}/{}-{}", op.ts.peer.as_str(), ts_component(&op.ts), op.entity_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;
    use crate::store::MemStore;

    fn peer(p: &str) -> PeerId {
        PeerId::new(p)
    }

    fn cap() -> crate::model::CapacityVector {
        [("cpu".to_string(), 4.0)].into_iter().collect()
    }

    #[tokio::test]
    async fn s6_restart_replays_tail_onto_snapshot() {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let snapper = Snapshotter::new(store.clone(), peer("p1"), 1000, 3600, 1);

        let mut state = ResourceModel::new(1);
        let epoch = HybridTimestamp::epoch(peer("p1"));
        state
            .upsert_resource("r1", ResourceKind::Compute, cap(), HybridTimestamp::new(100, 0, &peer("p1")))
            .unwrap();
        let ops = state.delta_since(&epoch);
        snapper.record_ops(&ops).await.unwrap();
        snapper.snapshot(&state, 1_000).await.unwrap();

        state
            .upsert_resource("r2", ResourceKind::Compute, cap(), HybridTimestamp::new(200, 0, &peer("p1")))
            .unwrap();
        let high_water_after_snap = state.high_water_mark(peer("p1"));
        let more_ops: Vec<_> = state
            .delta_since(&HybridTimestamp::new(100, 0, &peer("p1")))
            .into_iter()
            .filter(|op| op.entity_id == "r2")
            .collect();
        snapper.record_ops(&more_ops).await.unwrap();

        let replayed = snapper.load().await.unwrap();
        assert!(replayed.resource_view("r1").is_some());
        assert!(replayed.resource_view("r2").is_some());
        assert!(replayed.high_water_mark(peer("p1")) >= high_water_after_snap);
    }

    #[tokio::test]
    async fn is_due_fires_on_op_count_threshold() {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let snapper = Snapshotter::new(store, peer("p1"), 2, 3_600_000, 1);
        assert!(!snapper.is_due(0));
        snapper
            .record_ops(&[DeltaOp::new(
                crate::wire::EntityKind::Resource,
                "r1",
                HybridTimestamp::new(1, 0, &peer("p1")),
                crate::wire::EntityPayload::TenantShare(None),
            )])
            .await
            .unwrap();
        snapper
            .record_ops(&[DeltaOp::new(
                crate::wire::EntityKind::Resource,
                "r2",
                HybridTimestamp::new(2, 0, &peer("p1")),
                crate::wire::EntityPayload::TenantShare(None),
            )])
            .await
            .unwrap();
        assert!(snapper.is_due(0));
    }
}
