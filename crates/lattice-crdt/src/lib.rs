//! Conflict-free replicated data types for distributed infrastructure
//! state, driven by a hybrid logical clock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐     ┌─────────────────────┐
//! │   ResourceModel      │     │   Scheduler          │
//! │   (datacenters,      │     │   (claims, windows)  │
//! │    resources)        │     │                      │
//! └──────────┬───────────┘     └──────────┬───────────┘
//!            │                            │
//!            ▼                            ▼
//! ┌──────────────────────────────────────────────────┐
//! │            CRDT Layer (this crate)                │
//! │  LwwRegister · LwwMap · OrSet · FractionalArray   │
//! │  · MvMap, all stamped by HybridClock              │
//! └──────────────────────────────────────────────────┘
//!            │
//!            ▼
//! ┌──────────────────────────────────────────────────┐
//! │         Peer Sync Engine (gossip / anti-entropy)   │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Every primitive implements [`traits::Crdt`] (pure `merge` + deterministic
//! `value()`) and, where gossip needs incremental transfer,
//! [`traits::Delta`] (`apply`/`delta`). There is no dynamic dispatch across
//! primitive types — callers compose concrete types directly.

pub mod clock;
pub mod fractional;
pub mod lww;
pub mod mvmap;
pub mod orset;
pub mod traits;

pub use clock::{HybridClock, HybridTimestamp, PeerId};
pub use fractional::{Frac, FractionalArray};
pub use lww::{LwwMap, LwwRegister};
pub use mvmap::{MvMap, MvMapOp};
pub use orset::{OrSet, OrSetOp};
pub use traits::{Crdt, Delta};

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify all public re-exports are accessible and the capability
    /// traits are usable with every concrete primitive.
    #[test]
    fn public_surface_is_wired_up() {
        let peer = PeerId::new("p1");
        let clock = HybridClock::new(peer.clone());
        let ts = clock.now();

        let mut reg = LwwRegister::new(1, ts.clone());
        reg.merge(&reg.clone());
        assert_eq!(reg.value(), 1);

        let mut map: LwwMap<String, i32> = LwwMap::new();
        map.insert("a".into(), 1, ts.clone());
        assert_eq!(map.value().len(), 1);

        let mut set: OrSet<String> = OrSet::new();
        set.add("x".into(), ts.clone());
        assert!(set.contains(&"x".to_string()));

        let mut arr: FractionalArray<&str> = FractionalArray::new();
        arr.insert_between(None, None, "only", ts.clone());
        assert_eq!(arr.value(), vec!["only"]);

        let mut mv: MvMap<String, String> = MvMap::new();
        mv.write("slot".into(), "r1".into(), ts);
        assert_eq!(mv.get(&"slot".to_string()), vec!["r1".to_string()]);
    }

    fn assert_crdt<T: Crdt>(_: &T) {}

    #[test]
    fn every_primitive_implements_crdt() {
        let peer = PeerId::new("p1");
        let ts = HybridTimestamp::new(100, 0, &peer);
        assert_crdt(&LwwRegister::new(1, ts.clone()));
        assert_crdt(&LwwMap::<String, i32>::new());
        assert_crdt(&OrSet::<String>::new());
        assert_crdt(&FractionalArray::<i32>::new());
        assert_crdt(&MvMap::<String, i32>::new());
    }
}
