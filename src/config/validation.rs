//! Post-load configuration validation, run as a separate pass from
//! deserialization (mirroring the teacher's own `config.rs` / `validate`
//! split) so that structurally-valid-but-nonsensical configs (an empty
//! peer secret, a peer listing itself) are caught before the process
//! starts accepting connections.

use super::types::Config;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("peer.peer_id must not be empty")]
    EmptyPeerId,
    #[error("peer.peer_secret must not be empty")]
    EmptyPeerSecret,
    #[error("peer.clock_offset_secs must be positive")]
    NonPositiveClockOffset,
    #[error("sync.sync_max_ops must be positive")]
    ZeroSyncMax,
    #[error("a configured peer endpoint has the same peer_id as this peer")]
    SelfReferentialPeer,
    #[error("duplicate peer_id in peer.peers: {0}")]
    DuplicatePeer(String),
}

pub fn validate(config: &Config) -> Result<(), Vec<ConfigValidationError>> {
    let mut errors = Vec::new();

    if config.peer.peer_id.trim().is_empty() {
        errors.push(ConfigValidationError::EmptyPeerId);
    }
    if config.peer.peer_secret.is_empty() {
        errors.push(ConfigValidationError::EmptyPeerSecret);
    }
    if config.peer.clock_offset_secs <= 0.0 {
        errors.push(ConfigValidationError::NonPositiveClockOffset);
    }
    if config.sync.sync_max_ops == 0 {
        errors.push(ConfigValidationError::ZeroSyncMax);
    }

    let mut seen = std::collections::HashSet::new();
    for endpoint in &config.peer.peers {
        if endpoint.peer_id == config.peer.peer_id {
            errors.push(ConfigValidationError::SelfReferentialPeer);
        }
        if !seen.insert(endpoint.peer_id.clone()) {
            errors.push(ConfigValidationError::DuplicatePeer(
                endpoint.peer_id.clone(),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
