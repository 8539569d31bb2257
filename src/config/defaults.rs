//! Named defaults referenced outside of serde field defaults, kept in one
//! place so operators and the startup banner agree on what "default" means.

/// Global default tenant share when no per-tenant override is configured.
pub const DEFAULT_SHARE: u32 = 1;

/// Backpressure thresholds (spec.md §4.6 / §6).
pub const DEFAULT_SYNC_DELTA_SECS: u64 = 180;
pub const DEFAULT_SYNC_MAX_OPS: u64 = 1000;

/// Acceptable wall-clock skew before a remote timestamp is rejected.
pub const DEFAULT_CLOCK_OFFSET_SECS: f64 = 1.0;

/// Default bind address for inbound peer websocket connections.
pub const DEFAULT_SYNC_LISTEN_ADDR: &str = "0.0.0.0:7946";

/// Base and cap for the peer reconnect backoff (spec.md §4.6 cancellation
/// / §7 `SyncTransportError`).
pub const RECONNECT_BASE_DELAY_SECS: u64 = 1;
pub const RECONNECT_MAX_DELAY_SECS: u64 = 60;

/// Consecutive missed pushes before an adapter-owned resource is
/// tombstoned (spec.md §4.7 `inventory_push` grace interval).
pub const DEFAULT_CONTROLLER_GRACE_PUSHES: u32 = 3;

/// Cool-off window applied to placements implicated by a `ControllerError`
/// from `placement_hook` (spec.md §4.7 / §7).
pub const DEFAULT_CONTROLLER_COOLOFF_SECS: u64 = 300;
