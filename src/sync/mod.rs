//! Peer Sync Engine (C6, spec §4.6): the gossip layer that keeps every
//! peer's [`crate::model::ResourceModel`] converging via CRDT merges over
//! authenticated websocket links.
//!
//! Grounded in the teacher's server-to-server sync stack (`src/sync/`):
//! the `Unconnected -> Handshaking -> Bursting -> Synced` state machine
//! mirrors `HandshakeState`, the `DashMap<PeerId, PeerLink>` registry
//! mirrors `SyncManager::links`, and the reconnect loop generalizes the
//! teacher's fixed-delay retry into the bounded exponential backoff spec §7
//! requires for `SyncTransportError`. The wire protocol itself (JSON
//! envelopes over `tokio_tungstenite` websockets) has no teacher analog —
//! the teacher's own S2S link is a raw-TCP line protocol — and is
//! engineered directly from spec §4.6/§6, recorded in DESIGN.md.

pub mod backoff;
pub mod envelope;
pub mod link;
pub mod manager;

pub use backoff::Backoff;
pub use envelope::{DeltaBody, Envelope, HelloBody, MessageKind, SnapshotBody, SnapshotReqBody};
pub use link::{ConnectionState, PeerLink};
pub use manager::{record_poll_tick, SyncManager};
