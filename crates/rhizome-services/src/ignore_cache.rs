//! Ignore cache — a negative cache for manifests that failed verification
//! or were otherwise malformed, so a misbehaving peer cannot make the
//! engine re-verify the same garbage on every advertisement.
//!
//! Entries expire naturally; there is no sweep, matching the reference
//! ("ignored-ness" is checked before spending effort on a candidate, so a
//! stale entry only costs one comparison against `expires_at`).

use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use rand::Rng;

const BINS: usize = 64;
const WAYS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Entry {
    bundle_id: [u8; 32],
    peer_stream_addr: Option<SocketAddrV4>,
    peer_sid: [u8; 32],
    expires_at: Instant,
}

pub struct IgnoreCache {
    bins: Vec<[Option<Entry>; WAYS]>,
    ttl: Duration,
}

impl IgnoreCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            bins: vec![[None; WAYS]; BINS],
            ttl,
        }
    }

    /// High 6 bits of BID[0].
    fn bin_index(bundle_id: &[u8; 32]) -> usize {
        (bundle_id[0] >> 2) as usize
    }

    pub fn is_ignored(&self, bundle_id: &[u8; 32], now: Instant) -> bool {
        let idx = Self::bin_index(bundle_id);
        self.bins[idx]
            .iter()
            .flatten()
            .any(|e| e.bundle_id == *bundle_id && e.expires_at > now)
    }

    pub fn mark_ignored(
        &mut self,
        bundle_id: &[u8; 32],
        peer_stream_addr: Option<SocketAddrV4>,
        peer_sid: [u8; 32],
        now: Instant,
    ) {
        let idx = Self::bin_index(bundle_id);
        let entry = Entry {
            bundle_id: *bundle_id,
            peer_stream_addr,
            peer_sid,
            expires_at: now + self.ttl,
        };
        let bin = &mut self.bins[idx];

        if let Some(slot) = bin
            .iter_mut()
            .find(|slot| matches!(slot, Some(e) if e.bundle_id == *bundle_id))
        {
            *slot = Some(entry);
        } else if let Some(slot) = bin.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(entry);
        } else {
            let victim = rand::thread_rng().gen_range(0..WAYS);
            bin[victim] = Some(entry);
        }

        tracing::debug!(bundle_id = hex::encode(bundle_id), "bundle ignored");
    }
}
