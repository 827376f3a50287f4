//! The external `View` collaborator and the per-prefix user-data channel (C5).
//!
//! Modeled as a side-table keyed by prefix identity rather than an
//! arena-handle-plus-destructor bolted onto a foreign view object — there
//! is no ambient user-data pointer to hang off of in Rust, so
//! [`InMemoryView`] keeps its own `HashMap<Prefix, _>` and a single
//! view-wide destructor, panicking if a caller tries to rebind the
//! destructor after one is already set.

use ipnet::IpNet;
use std::any::Any;
use std::collections::HashMap;

/// A routable prefix. `ipnet::IpNet` already gives us `Copy`, `Hash`, `Eq`
/// and a `prefix_len()`/`network()` accessor, so it doubles as the memo
/// table key directly.
pub type Prefix = IpNet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PrefixFamily {
    V4 = 0,
    V6 = 1,
}

pub fn family_of(prefix: &Prefix) -> PrefixFamily {
    match prefix {
        IpNet::V4(_) => PrefixFamily::V4,
        IpNet::V6(_) => PrefixFamily::V6,
    }
}

pub type PeerId = u32;
pub type PeerSignature = u64;

/// The last AS-path segment for a route, as seen by one peer for one
/// prefix. A plain ASN attributes the origin directly; anything else (AS
/// set, confederation segment) attributes to ASN 0 per the geo-visibility
/// consumer's documented rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginAsPathSegment {
    Asn(u32),
    NonPlain,
}

impl OriginAsPathSegment {
    pub fn attributed_asn(&self) -> u32 {
        match self {
            OriginAsPathSegment::Asn(asn) => *asn,
            OriginAsPathSegment::NonPlain => 0,
        }
    }
}

/// One peer's observation of a prefix.
#[derive(Debug, Clone, Copy)]
pub struct PrefixObservation {
    pub peer_id: PeerId,
    pub peer_signature: PeerSignature,
    pub origin: OriginAsPathSegment,
}

/// A BGP view: an iterable stream of `(prefix, peer, peer-signature,
/// origin-AS-path-segment)` tuples with O(1) per-prefix user-data access.
pub trait View: Send {
    /// Seconds since the epoch at which this view was captured.
    fn timestamp(&self) -> i64;

    /// All prefixes of one address family, each with every peer
    /// observation recorded against it.
    fn family_prefixes(&self, family: PrefixFamily) -> &[(Prefix, Vec<PrefixObservation>)];

    /// The set of distinct peer ids observed anywhere in this view, for a
    /// given family — used by the visibility consumer to determine
    /// full-feed status.
    fn peer_ids(&self, family: PrefixFamily) -> Vec<PeerId>;

    /// How many prefixes of `family` a peer must observe to be considered
    /// to have a full routing table view, as a raw count (not fraction).
    fn prefix_count(&self, family: PrefixFamily) -> usize;

    /// How many of `family`'s prefixes a given peer observed.
    fn peer_prefix_count(&self, family: PrefixFamily, peer_id: PeerId) -> usize;

    /// Peer's origin ASN, if the peer itself is attributable to a stable
    /// ASN (used when classifying full-feed peers by ASN).
    fn peer_asn(&self, peer_id: PeerId) -> Option<u32>;

    fn user_data(&self, prefix: &Prefix) -> Option<&(dyn Any + Send)>;
    fn set_user_data(&mut self, prefix: Prefix, data: Box<dyn Any + Send>);

    /// Registers the single view-wide destructor. Calling this a second
    /// time is a logic error — the API forbids rebinding a different
    /// destructor once data may already be attached.
    fn set_destructor(&mut self, destructor: Box<dyn FnMut(Box<dyn Any + Send>) + Send>);

    /// Whether a destructor has already been registered. A consumer that
    /// may see the same view instance reused across cycles (or may run
    /// after another consumer already claimed the slot) must check this
    /// before calling [`set_destructor`](View::set_destructor).
    fn has_destructor(&self) -> bool;

    /// Invokes the destructor (if any) on every attached slot and clears
    /// them. Called once per view, at view-end.
    fn clear(&mut self);
}

/// Reference [`View`] implementation backed by plain in-memory vectors and
/// hash maps. Suitable for tests and for a local single-process deployment
/// that already has the view materialised.
pub struct InMemoryView {
    timestamp: i64,
    prefixes: [Vec<(Prefix, Vec<PrefixObservation>)>; 2],
    peer_asns: HashMap<PeerId, u32>,
    user_data: HashMap<Prefix, Box<dyn Any + Send>>,
    destructor: Option<Box<dyn FnMut(Box<dyn Any + Send>) + Send>>,
}

impl InMemoryView {
    pub fn new(timestamp: i64) -> Self {
        InMemoryView {
            timestamp,
            prefixes: [Vec::new(), Vec::new()],
            peer_asns: HashMap::new(),
            user_data: HashMap::new(),
            destructor: None,
        }
    }

    pub fn add_prefix(&mut self, prefix: Prefix, observations: Vec<PrefixObservation>) {
        let family = family_of(&prefix);
        self.prefixes[family as usize].push((prefix, observations));
    }

    pub fn set_peer_asn(&mut self, peer_id: PeerId, asn: u32) {
        self.peer_asns.insert(peer_id, asn);
    }
}

impl View for InMemoryView {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn family_prefixes(&self, family: PrefixFamily) -> &[(Prefix, Vec<PrefixObservation>)] {
        &self.prefixes[family as usize]
    }

    fn peer_ids(&self, family: PrefixFamily) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.prefixes[family as usize]
            .iter()
            .flat_map(|(_, obs)| obs.iter().map(|o| o.peer_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn prefix_count(&self, family: PrefixFamily) -> usize {
        self.prefixes[family as usize].len()
    }

    fn peer_prefix_count(&self, family: PrefixFamily, peer_id: PeerId) -> usize {
        self.prefixes[family as usize]
            .iter()
            .filter(|(_, obs)| obs.iter().any(|o| o.peer_id == peer_id))
            .count()
    }

    fn peer_asn(&self, peer_id: PeerId) -> Option<u32> {
        self.peer_asns.get(&peer_id).copied()
    }

    fn user_data(&self, prefix: &Prefix) -> Option<&(dyn Any + Send)> {
        self.user_data.get(prefix).map(|b| b.as_ref())
    }

    fn set_user_data(&mut self, prefix: Prefix, data: Box<dyn Any + Send>) {
        self.user_data.insert(prefix, data);
    }

    fn set_destructor(&mut self, destructor: Box<dyn FnMut(Box<dyn Any + Send>) + Send>) {
        assert!(
            self.destructor.is_none(),
            "rebinding the per-view user-data destructor is forbidden"
        );
        self.destructor = Some(destructor);
    }

    fn has_destructor(&self) -> bool {
        self.destructor.is_some()
    }

    fn clear(&mut self) {
        let slots: Vec<_> = self.user_data.drain().collect();
        if let Some(destructor) = self.destructor.as_mut() {
            for (_, data) in slots {
                destructor(data);
            }
        }
    }
}
