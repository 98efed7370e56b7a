//! Size-tiered fetch queue set.
//!
//! Each tier is a fixed-capacity, hole-free array of candidates ordered by
//! priority then arrival. `suggest_queue` is the admission algorithm described
//! in the component design: fast-reject via the version cache, immediate
//! import of zero-length manifests, duplicate-by-BID resolution, and
//! priority-ordered insertion.

use std::time::Instant;

use rhizome_core::config::TierConfig;
use rhizome_core::manifest::{Manifest, ManifestVerifier, PeerAddr};

use crate::ignore_cache::IgnoreCache;
use crate::version_cache::{VersionCache, VersionLookup};

pub const DEFAULT_PRIORITY: i32 = 100;

#[derive(Debug, Clone)]
pub struct FetchCandidate {
    pub manifest: Manifest,
    pub peer: PeerAddr,
    pub priority: i32,
}

/// One size tier: a bound (exclusive, `None` = unbounded) and a fixed-size,
/// hole-free candidate array.
#[derive(Debug)]
pub struct Tier {
    pub bound: Option<u64>,
    candidates: Vec<Option<FetchCandidate>>,
}

impl Tier {
    fn new(bound: Option<u64>, capacity: usize) -> Self {
        Self {
            bound,
            candidates: (0..capacity).map(|_| None).collect(),
        }
    }

    fn accepts(&self, payload_length: u64) -> bool {
        match self.bound {
            Some(bound) => payload_length < bound,
            None => true,
        }
    }

    fn find_bid(&self, bundle_id: &[u8; 32]) -> Option<usize> {
        self.candidates
            .iter()
            .position(|c| matches!(c, Some(c) if c.manifest.bundle_id == *bundle_id))
    }

    fn find_payload_hash(&self, payload_hash: &str) -> Option<usize> {
        self.candidates
            .iter()
            .position(|c| matches!(c, Some(c) if c.manifest.payload_hash == payload_hash))
    }

    /// First index whose occupant has strictly lower priority (numerically
    /// greater value) than `priority`, or the first empty slot. `None` means
    /// the tier is full at equal-or-higher priority throughout.
    fn insertion_index(&self, priority: i32) -> Option<usize> {
        for (i, slot) in self.candidates.iter().enumerate() {
            match slot {
                None => return Some(i),
                Some(c) if c.priority > priority => return Some(i),
                Some(_) => {}
            }
        }
        None
    }

    /// Inserts at `index`, shifting later candidates right. If the tier was
    /// already full, the displaced tail candidate's manifest is freed (the
    /// reference's documented behaviour for this otherwise-unreachable case).
    fn insert_at(&mut self, index: usize, candidate: FetchCandidate) {
        let cap = self.candidates.len();
        for i in (index + 1..cap).rev() {
            self.candidates[i] = self.candidates[i - 1].take();
        }
        self.candidates[index] = Some(candidate);
    }

    /// Removes the candidate at `index`, compacting the array left so there
    /// are no holes before the former tail.
    pub fn remove(&mut self, index: usize) -> Option<FetchCandidate> {
        let removed = self.candidates[index].take();
        let cap = self.candidates.len();
        for i in index..cap - 1 {
            self.candidates[i] = self.candidates[i + 1].take();
        }
        removed
    }

    pub fn candidate(&self, index: usize) -> Option<&FetchCandidate> {
        self.candidates[index].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FetchCandidate)> {
        self.candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i, c)))
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.iter().all(|c| c.is_none())
    }
}

pub struct QueueSet {
    tiers: Vec<Tier>,
}

impl QueueSet {
    pub fn new(configs: &[TierConfig]) -> Self {
        Self {
            tiers: configs
                .iter()
                .map(|c| Tier::new(c.bound, c.capacity))
                .collect(),
        }
    }

    pub fn select_tier(&self, payload_length: u64) -> Option<usize> {
        self.tiers.iter().position(|t| t.accepts(payload_length))
    }

    pub fn find_bid_any(&self, bundle_id: &[u8; 32]) -> Option<(usize, usize)> {
        self.tiers
            .iter()
            .enumerate()
            .find_map(|(ti, tier)| tier.find_bid(bundle_id).map(|ci| (ti, ci)))
    }

    pub fn find_payload_hash_any(&self, payload_hash: &str) -> Option<(usize, usize)> {
        self.tiers
            .iter()
            .enumerate()
            .find_map(|(ti, tier)| tier.find_payload_hash(payload_hash).map(|ci| (ti, ci)))
    }

    pub fn tier(&self, index: usize) -> &Tier {
        &self.tiers[index]
    }

    pub fn tier_mut(&mut self, index: usize) -> &mut Tier {
        &mut self.tiers[index]
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn any_queued(&self) -> bool {
        self.tiers.iter().any(|t| !t.is_empty())
    }
}

#[derive(Debug)]
pub enum AdmitOutcome {
    /// `payload_length == 0` and verification succeeded: hand straight to
    /// the importer, no slot involved.
    ImportNow(Manifest),
    /// Inserted into this tier; the activator should be armed if not
    /// already.
    Queued { tier_index: usize },
    /// Superseded, duplicate, or failed verification — the manifest has
    /// been freed (and, for verification failures, the BID ignored).
    Dropped,
    /// The target tier is full at equal-or-higher priority.
    Rejected,
}

/// The queue-set admission algorithm (`suggest_queue`).
#[allow(clippy::too_many_arguments)]
pub fn suggest_queue(
    queue: &mut QueueSet,
    versions: &VersionCache,
    ignored: &mut IgnoreCache,
    verifier: &dyn ManifestVerifier,
    manifest: Manifest,
    peer: PeerAddr,
    priority: i32,
    now: Instant,
) -> AdmitOutcome {
    match versions.lookup(&manifest) {
        VersionLookup::HaveSameOrNewer | VersionLookup::HaveStrictlyNewer => {
            return AdmitOutcome::Dropped;
        }
        VersionLookup::BadManifest => {
            ignored.mark_ignored(&manifest.bundle_id, peer.stream_addr, peer.sid, now);
            return AdmitOutcome::Dropped;
        }
        VersionLookup::New => {}
    }

    if manifest.payload_length == 0 {
        if verifier.verify(&manifest) {
            return AdmitOutcome::ImportNow(manifest);
        }
        ignored.mark_ignored(&manifest.bundle_id, peer.stream_addr, peer.sid, now);
        return AdmitOutcome::Dropped;
    }

    let Some(tier_index) = queue.select_tier(manifest.payload_length) else {
        return AdmitOutcome::Rejected;
    };

    let mut already_verified = false;
    if let Some((dup_tier, dup_index)) = queue.find_bid_any(&manifest.bundle_id) {
        let queued_version = queue
            .tier(dup_tier)
            .candidate(dup_index)
            .expect("index came from find_bid_any")
            .manifest
            .version;
        if queued_version >= manifest.version {
            return AdmitOutcome::Dropped;
        }
        if !manifest.self_signed {
            if !verifier.verify(&manifest) {
                ignored.mark_ignored(&manifest.bundle_id, peer.stream_addr, peer.sid, now);
                return AdmitOutcome::Dropped;
            }
            already_verified = true;
        }
        queue.tier_mut(dup_tier).remove(dup_index);
    }

    let Some(ci) = queue.tier(tier_index).insertion_index(priority) else {
        return AdmitOutcome::Rejected;
    };

    if !already_verified && !verifier.verify(&manifest) {
        ignored.mark_ignored(&manifest.bundle_id, peer.stream_addr, peer.sid, now);
        return AdmitOutcome::Dropped;
    }

    queue.tier_mut(tier_index).insert_at(
        ci,
        FetchCandidate {
            manifest,
            peer,
            priority,
        },
    );
    AdmitOutcome::Queued { tier_index }
}
