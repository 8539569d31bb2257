//! Unified error taxonomy for latticed.
//!
//! One `thiserror`-derived enum per concern (spec §7), each carrying a
//! static `error_code()` for metrics labeling. [`CoreError`] is the
//! umbrella type for call sites that need a single error type across
//! concerns.

use thiserror::Error;

/// Malformed operation or configuration; rejected locally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown resource kind: {0}")]
    InvalidKind(String),

    #[error("capacity vector does not match schema for kind {kind}")]
    CapacityShape { kind: String },

    #[error("empty or invalid identifier")]
    InvalidId,

    #[error("claim window end must be after start")]
    InvalidWindow,

    #[error("resource profile quantity must be positive")]
    InvalidQuantity,
}

impl ValidationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidKind(_) => "invalid_kind",
            Self::CapacityShape { .. } => "capacity_shape",
            Self::InvalidId => "invalid_id",
            Self::InvalidWindow => "invalid_window",
            Self::InvalidQuantity => "invalid_quantity",
        }
    }
}

/// Reference to an id with no creation observed locally. Retried once after
/// a fresh merge by the caller, then surfaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown entity: {kind} {id}")]
pub struct UnknownEntityError {
    pub kind: &'static str,
    pub id: String,
}

impl UnknownEntityError {
    pub fn error_code(&self) -> &'static str {
        "unknown_entity"
    }
}

/// Scheduler could not satisfy a profile.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("no resources of kind {kind} match required attributes")]
    NoMatchingResources { kind: String },

    #[error("only {available} of {requested} units available for window")]
    InsufficientQuantity { requested: u64, available: u64 },

    #[error("admission deadline exceeded")]
    DeadlineExceeded,
}

impl CapacityError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoMatchingResources { .. } => "no_matching_resources",
            Self::InsufficientQuantity { .. } => "insufficient_quantity",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// HMAC mismatch, skew violation, or unknown peer in strict mode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncAuthError {
    #[error("HMAC verification failed")]
    BadHmac,

    #[error("clock skew {skew_ms}ms exceeds bound {bound_ms}ms")]
    ExcessiveSkew { skew_ms: i64, bound_ms: i64 },

    #[error("sender endpoint not in configured peer list")]
    UnknownPeer,
}

impl SyncAuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadHmac => "bad_hmac",
            Self::ExcessiveSkew { .. } => "excessive_skew",
            Self::UnknownPeer => "unknown_peer",
        }
    }
}

/// Websocket transport failure. Connection dropped, queued ops retained.
#[derive(Debug, Error)]
pub enum SyncTransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("connection closed")]
    Closed,
}

impl SyncTransportError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect_failed",
            Self::Send(_) => "send_failed",
            Self::Closed => "closed",
        }
    }
}

/// Persistence I/O failure. The op stays in the delta log; repeated
/// failure raises a health signal but never stops the service.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Backend(_) => "backend",
        }
    }
}

/// Adapter returned an error from a placement hook. Claim reverts to
/// `admitted`, offending resources cool off.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("controller error: {0}")]
pub struct ControllerError(pub String);

impl ControllerError {
    pub fn error_code(&self) -> &'static str {
        "controller_error"
    }
}

/// Umbrella error for call sites that need one error type (e.g. the CLI
/// entry point and HTTP handlers).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    UnknownEntity(#[from] UnknownEntityError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    SyncAuth(#[from] SyncAuthError),
    #[error(transparent)]
    SyncTransport(#[from] SyncTransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl CoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.error_code(),
            Self::UnknownEntity(e) => e.error_code(),
            Self::Capacity(e) => e.error_code(),
            Self::SyncAuth(e) => e.error_code(),
            Self::SyncTransport(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Controller(e) => e.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable_strings() {
        assert_eq!(ValidationError::InvalidId.error_code(), "invalid_id");
        assert_eq!(
            CapacityError::DeadlineExceeded.error_code(),
            "deadline_exceeded"
        );
        assert_eq!(SyncAuthError::BadHmac.error_code(), "bad_hmac");
    }

    #[test]
    fn core_error_wraps_and_forwards_code() {
        let e: CoreError = ValidationError::InvalidId.into();
        assert_eq!(e.error_code(), "invalid_id");
    }
}
