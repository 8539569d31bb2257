//! Configuration type definitions.

use serde::Deserialize;
use std::collections::HashMap;

fn default_clock_offset() -> f64 {
    1.0
}

fn default_sync_delta() -> u64 {
    180
}

fn default_sync_max() -> u64 {
    1000
}

fn default_share() -> u32 {
    1
}

fn default_admission_deadline_ms() -> u64 {
    250
}

fn default_snapshot_ops() -> u64 {
    1000
}

fn default_snapshot_secs() -> u64 {
    60
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9100".to_string()
}

fn default_grace_pushes() -> u32 {
    3
}

fn default_cooloff_secs() -> u64 {
    300
}

fn default_sync_listen_addr() -> String {
    "0.0.0.0:7946".to_string()
}

/// Root configuration. Mirrors spec.md §6's recognized options one for
/// one, plus the ambient observability/store knobs every deployable
/// binary in this corpus carries.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub peer: PeerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Peer identity, authentication, and topology.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// Stable self identity.
    pub peer_id: String,
    /// Advertised hostname. Auto-detected at startup when absent.
    pub host_id: Option<String>,
    /// Shared HMAC key for authenticating gossip messages.
    pub peer_secret: String,
    /// Configured peer endpoints to gossip with.
    #[serde(default)]
    pub peers: Vec<PeerEndpoint>,
    /// When true, a sender's endpoint must match a configured peer.
    #[serde(default)]
    pub peer_strict: bool,
    /// Acceptable wall-clock skew, in seconds, before a remote timestamp is
    /// treated as suspicious.
    #[serde(default = "default_clock_offset")]
    pub clock_offset_secs: f64,
    /// Address this peer accepts inbound websocket connections on (spec.md
    /// §4.6 "either side may initiate").
    #[serde(default = "default_sync_listen_addr")]
    pub sync_listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerEndpoint {
    pub peer_id: String,
    pub url: String,
}

/// Backpressure thresholds for the peer sync engine (spec.md §4.6).
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_delta")]
    pub sync_delta_secs: u64,
    #[serde(default = "default_sync_max")]
    pub sync_max_ops: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_delta_secs: default_sync_delta(),
            sync_max_ops: default_sync_max(),
        }
    }
}

/// Fair-share scheduler policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Default per-tenant share when no override is configured.
    #[serde(default = "default_share")]
    pub default_share: u32,
    /// Per-tenant overrides.
    #[serde(default)]
    pub tenant_shares: HashMap<String, u32>,
    /// Wall-clock budget for one admission pass over all pending claims
    /// before remaining claims are left pending for the next pass (spec
    /// §5 per-operation deadline discipline).
    #[serde(default = "default_admission_deadline_ms")]
    pub admission_deadline_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_share: default_share(),
            tenant_shares: HashMap::new(),
            admission_deadline_ms: default_admission_deadline_ms(),
        }
    }
}

/// Store backend and snapshot cadence (spec.md §4.4).
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the embedded database file. When absent, the in-memory
    /// backend is used (no persistence across restarts).
    pub path: Option<String>,
    #[serde(default = "default_snapshot_ops")]
    pub snapshot_interval_ops: u64,
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_interval_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            snapshot_interval_ops: default_snapshot_ops(),
            snapshot_interval_seconds: default_snapshot_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

/// Controller adapter policy (spec.md §4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Consecutive missed `inventory_push` cycles before an adapter-owned
    /// resource absent from the push is tombstoned.
    #[serde(default = "default_grace_pushes")]
    pub grace_interval_pushes: u32,
    /// Cool-off window, in seconds, applied to resources implicated by a
    /// `placement_hook` error.
    #[serde(default = "default_cooloff_secs")]
    pub cooloff_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            grace_interval_pushes: default_grace_pushes(),
            cooloff_secs: default_cooloff_secs(),
        }
    }
}
