//! Store & Snapshotting (C4): an opaque key-value sink the core persists
//! through, plus the snapshot/delta-log cadence that lets a peer restart
//! warm (spec §4.4).
//!
//! Two backends ship, grounded in the teacher's `HistoryProvider`
//! trait-with-multiple-backends split (`src/history/mod.rs`,
//! `src/history/redb.rs`, `src/history/noop.rs`): [`redb_store::RedbStore`]
//! is the durable default, [`mem_store::MemStore`] is an in-process
//! `DashMap`-backed stand-in for tests and no-persistence deployments.

pub mod mem_store;
pub mod redb_store;
pub mod snapshot;

use async_trait::async_trait;

pub use mem_store::MemStore;
pub use redb_store::RedbStore;
pub use snapshot::{SnapshotEnvelope, SnapshotMeta, Snapshotter, SCHEMA_VERSION};

use crate::error::StoreError;

/// Backend-agnostic key-value sink (spec §4.4's `put`/`get`/`scan`
/// contract). Keys are opaque UTF-8 strings; `scan` returns every entry
/// whose key starts with `prefix`, in key order.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}
