//! The wire representation of CRDT mutations (spec §6): `entity_kind` +
//! `entity_id` + timestamp + payload, exchanged in DELTA envelopes and
//! written to the store's delta log.
//!
//! Implementation note (recorded in DESIGN.md): granularity is per-entity,
//! not per-field. Each [`DeltaOp`] carries the entity's full current CRDT
//! state rather than a single field mutation. This stays within spec §4.2's
//! contract — `delta(since)` need only return "all operations whose
//! timestamp exceeds `since`", and replaying a full entity snapshot through
//! the same field-level `merge` used everywhere else is still commutative,
//! associative, and idempotent — while avoiding a second, parallel
//! fine-grained op representation for every entity type in §3.

use lattice_crdt::HybridTimestamp;
use serde::{Deserialize, Serialize};

use crate::model::{Claim, Datacenter, LogicalGroup, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Resource,
    Datacenter,
    LogicalGroup,
    Claim,
    TenantShare,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Datacenter => "datacenter",
            Self::LogicalGroup => "logical_group",
            Self::Claim => "claim",
            Self::TenantShare => "tenant_share",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EntityPayload {
    Resource(Box<Resource>),
    Datacenter(Box<Datacenter>),
    LogicalGroup(Box<LogicalGroup>),
    Claim(Box<Claim>),
    TenantShare(Option<u32>),
}

/// One CRDT mutation, as exchanged over the wire or recorded in the delta
/// log. `field` is always `"full"` at this granularity (see module docs);
/// kept as an explicit field so the envelope shape matches spec §6
/// verbatim for anyone reading the wire format off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaOp {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub field: &'static str,
    pub ts: HybridTimestamp,
    pub payload: EntityPayload,
}

impl DeltaOp {
    pub fn new(entity_kind: EntityKind, entity_id: impl Into<String>, ts: HybridTimestamp, payload: EntityPayload) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.into(),
            field: "full",
            ts,
            payload,
        }
    }
}
