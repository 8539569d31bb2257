//! Claims, resource profiles, and maintenance events (spec §3 "Claim").

use lattice_crdt::{Crdt, HybridTimestamp, LwwMap, LwwRegister, OrSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::resource::ResourceKind;

/// Pseudo-tenant id used by maintenance events: the scheduler treats a
/// claim with this tenant as not consuming fair-share, per spec §3/§4.5.
pub const MAINTENANCE_TENANT: &str = "__maintenance__";

/// An abstract description of desired resources, carried inside a claim.
/// `profile_id` gives two textually-identical profiles within the same
/// claim distinct identity under [`OrSet`]'s value-equality semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub profile_id: String,
    pub kind: ResourceKind,
    pub quantity: u64,
    /// `key=value` required-attribute predicates, ANDed together.
    pub required_attrs: BTreeSet<String>,
    /// `key=value` soft preferences; currently advisory only (not consulted
    /// by placement, which is greedy — see scheduler module docs).
    pub preferences: BTreeSet<String>,
}

impl ResourceProfile {
    pub fn new(profile_id: impl Into<String>, kind: ResourceKind, quantity: u64) -> Self {
        Self {
            profile_id: profile_id.into(),
            kind,
            quantity,
            required_attrs: BTreeSet::new(),
            preferences: BTreeSet::new(),
        }
    }

    pub fn with_required(mut self, attrs: impl IntoIterator<Item = String>) -> Self {
        self.required_attrs = attrs.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    Pending,
    Admitted,
    Placed,
    Rejected,
    Expired,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Admitted => "admitted",
            Self::Placed => "placed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Expired)
    }
}

/// A time-bounded reservation request. `window` and `priority` are plain
/// LWW fields (set once at submission, occasionally revised by an admin);
/// `status` and `placements` change as the scheduler state machine (§4.5)
/// drives the claim forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub tenant: String,
    pub profiles: OrSet<ResourceProfile>,
    pub window: LwwRegister<(i64, i64)>,
    pub priority: LwwRegister<i32>,
    pub status: LwwRegister<ClaimStatus>,
    /// profile_id -> assigned resource ids.
    pub placements: LwwMap<String, BTreeSet<String>>,
    /// Hybrid timestamp at which this claim was last admitted; used by the
    /// "smaller `(admit_timestamp, claim_id)` wins" re-admission rule
    /// (spec §4.5 failure semantics).
    pub admit_ts: LwwRegister<Option<HybridTimestamp>>,
    /// Human-readable cause of the most recent rejection, surfaced to the
    /// caller alongside a `rejected` status (spec §7 CapacityError).
    pub last_error: LwwRegister<Option<String>>,
}

impl Claim {
    pub fn new(
        id: String,
        tenant: String,
        window: (i64, i64),
        priority: i32,
        ts: HybridTimestamp,
    ) -> Self {
        Self {
            id,
            tenant,
            profiles: OrSet::new(),
            window: LwwRegister::new(window, ts.clone()),
            priority: LwwRegister::new(priority, ts.clone()),
            status: LwwRegister::new(ClaimStatus::Pending, ts.clone()),
            placements: LwwMap::new(),
            admit_ts: LwwRegister::new(None, ts.clone()),
            last_error: LwwRegister::new(None, ts),
        }
    }

    pub fn is_maintenance(&self) -> bool {
        self.tenant == MAINTENANCE_TENANT
    }

    pub fn add_profile(&mut self, profile: ResourceProfile, ts: HybridTimestamp) {
        self.profiles.add(profile, ts);
    }

    pub fn merge(&mut self, other: &Self) {
        self.profiles.merge(&other.profiles);
        self.window.merge(&other.window);
        self.priority.merge(&other.priority);
        self.status.merge(&other.status);
        self.placements.merge(&other.placements);
        self.admit_ts.merge(&other.admit_ts);
        self.last_error.merge(&other.last_error);
    }

    /// Most recent write timestamp across every field, for entity-level
    /// delta extraction.
    pub fn last_modified(&self) -> HybridTimestamp {
        [
            Some(self.window.timestamp().clone()),
            Some(self.priority.timestamp().clone()),
            Some(self.status.timestamp().clone()),
            Some(self.admit_ts.timestamp().clone()),
            Some(self.last_error.timestamp().clone()),
            self.profiles.latest_timestamp(),
            self.placements.latest_timestamp(),
        ]
        .into_iter()
        .flatten()
        .max()
        .expect("a claim always has at least its creation timestamp")
    }

    pub fn view(&self) -> ClaimView {
        ClaimView {
            id: self.id.clone(),
            tenant: self.tenant.clone(),
            profiles: self.profiles.value().into_iter().collect(),
            window: self.window.value(),
            priority: self.priority.value(),
            status: self.status.value(),
            placements: self
                .placements
                .value()
                .into_iter()
                .map(|(k, v)| (k, v))
                .collect(),
            admit_ts: self.admit_ts.value(),
            last_error: self.last_error.value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimView {
    pub id: String,
    pub tenant: String,
    pub profiles: Vec<ResourceProfile>,
    pub window: (i64, i64),
    pub priority: i32,
    pub status: ClaimStatus,
    pub placements: HashMap<String, BTreeSet<String>>,
    pub admit_ts: Option<HybridTimestamp>,
    pub last_error: Option<String>,
}
