//! The peer wire envelope (spec §6): `{v, kind, sender, host_id, ts, hmac,
//! body}`. HMAC covers the canonical serialization of every field but
//! itself, keyed by the shared `peer_secret`.

use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use lattice_crdt::HybridTimestamp;

use crate::error::SyncAuthError;
use crate::store::SnapshotEnvelope;
use crate::wire::DeltaOp;

type HmacSha256 = Hmac<Sha256>;

pub const WIRE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Hello,
    Delta,
    SnapshotReq,
    Snapshot,
}

/// `HELLO {peer_id, host_id, last_seen_ts_per_peer}` (spec §4.6 protocol 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloBody {
    pub peer_id: String,
    pub host_id: String,
    pub last_seen_ts_per_peer: std::collections::HashMap<String, HybridTimestamp>,
}

/// `DELTA {ops: [stamped op …]}` (spec §4.6 protocol 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaBody {
    pub ops: Vec<DeltaOp>,
}

/// `SNAPSHOT_REQ` carries nothing beyond the envelope (spec §4.6 protocol 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotReqBody {}

/// `SNAPSHOT {state}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub snapshot: SnapshotEnvelope,
}

/// The fields the HMAC is computed over, serialized in this struct's
/// declared field order so both sides produce byte-identical input
/// regardless of how `body` was constructed (spec §6 "canonical
/// serialization of every field but itself").
#[derive(Serialize)]
struct SigningPayload<'a> {
    sender: &'a str,
    host_id: &'a str,
    ts: &'a HybridTimestamp,
    body: &'a serde_json::Value,
}

fn signing_bytes(sender: &str, host_id: &str, ts: &HybridTimestamp, body: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&SigningPayload { sender, host_id, ts, body }).expect("envelope fields are always serializable")
}

fn mac_over(secret: &[u8], bytes: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(bytes);
    mac.finalize().into_bytes().to_vec()
}

/// A self-describing gossip frame, as sent and received over the peer
/// websocket transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u32,
    pub kind: MessageKind,
    pub sender: String,
    pub host_id: String,
    pub ts: HybridTimestamp,
    pub hmac: String,
    pub body: serde_json::Value,
}

impl Envelope {
    /// Builds and HMAC-signs an envelope around `body`.
    pub fn seal(
        kind: MessageKind,
        sender: impl Into<String>,
        host_id: impl Into<String>,
        ts: HybridTimestamp,
        body: impl Serialize,
        secret: &[u8],
    ) -> Self {
        let sender = sender.into();
        let host_id = host_id.into();
        let body = serde_json::to_value(body).expect("envelope bodies are always serializable");
        let bytes = signing_bytes(&sender, &host_id, &ts, &body);
        let hmac = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, mac_over(secret, &bytes));
        Self {
            v: WIRE_VERSION,
            kind,
            sender,
            host_id,
            ts,
            hmac,
            body,
        }
    }

    /// Verifies the HMAC in constant time. Does not check clock skew or
    /// strict-mode peer membership — see [`Self::check_clock_skew`] and the
    /// caller's own peer-list lookup.
    pub fn verify_hmac(&self, secret: &[u8]) -> Result<(), SyncAuthError> {
        let expected = mac_over(secret, &signing_bytes(&self.sender, &self.host_id, &self.ts, &self.body));
        let given = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &self.hmac).map_err(|_| SyncAuthError::BadHmac)?;
        if expected.ct_eq(&given).into() {
            Ok(())
        } else {
            Err(SyncAuthError::BadHmac)
        }
    }

    /// Rejects envelopes whose `ts.wall_ms` lies outside `local_now_ms +-
    /// bound_ms` (spec §4.6 authentication, §5 clock discipline).
    pub fn check_clock_skew(&self, local_now_ms: i64, bound_ms: i64) -> Result<(), SyncAuthError> {
        let skew = (self.ts.wall_ms - local_now_ms).abs();
        if skew > bound_ms {
            Err(SyncAuthError::ExcessiveSkew { skew_ms: skew, bound_ms })
        } else {
            Ok(())
        }
    }

    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_crdt::PeerId;

    fn ts(wall: i64) -> HybridTimestamp {
        HybridTimestamp::new(wall, 0, &PeerId::new("p1"))
    }

    #[test]
    fn seal_then_verify_round_trips() {
        let body = HelloBody {
            peer_id: "p1".into(),
            host_id: "p1.example".into(),
            last_seen_ts_per_peer: Default::default(),
        };
        let env = Envelope::seal(MessageKind::Hello, "p1", "p1.example", ts(1000), body, b"secret");
        assert!(env.verify_hmac(b"secret").is_ok());
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let body = DeltaBody { ops: vec![] };
        let env = Envelope::seal(MessageKind::Delta, "p1", "p1.example", ts(1000), body, b"secret");
        assert_eq!(env.verify_hmac(b"wrong").unwrap_err(), SyncAuthError::BadHmac);
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let body = DeltaBody { ops: vec![] };
        let mut env = Envelope::seal(MessageKind::Delta, "p1", "p1.example", ts(1000), body, b"secret");
        env.body = serde_json::json!({"ops": [1, 2, 3]});
        assert_eq!(env.verify_hmac(b"secret").unwrap_err(), SyncAuthError::BadHmac);
    }

    #[test]
    fn clock_skew_within_bound_is_accepted() {
        let body = SnapshotReqBody {};
        let env = Envelope::seal(MessageKind::SnapshotReq, "p1", "p1.example", ts(10_000), body, b"secret");
        assert!(env.check_clock_skew(10_500, 1000).is_ok());
        assert_eq!(
            env.check_clock_skew(12_000, 1000).unwrap_err(),
            SyncAuthError::ExcessiveSkew { skew_ms: 2000, bound_ms: 1000 }
        );
    }

    #[test]
    fn body_as_recovers_typed_body() {
        let body = HelloBody {
            peer_id: "p1".into(),
            host_id: "p1.example".into(),
            last_seen_ts_per_peer: Default::default(),
        };
        let env = Envelope::seal(MessageKind::Hello, "p1", "p1.example", ts(1000), body, b"secret");
        let recovered: HelloBody = env.body_as().unwrap();
        assert_eq!(recovered.peer_id, "p1");
    }
}
