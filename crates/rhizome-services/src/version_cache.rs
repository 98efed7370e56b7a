//! Manifest version cache.
//!
//! Lookup is authoritative against the bundle database — the associative
//! table below is an optimisation the lookup path does not currently take:
//! `lookup` always queries the store directly, the same way the reference
//! implementation's cache is reachable but dead. The table is kept
//! reachable (`store`/`cached_version`) because the contract permits either
//! behaviour and a live, independently-testable table costs little.

use std::sync::Arc;

use rand::Rng;
use rhizome_core::manifest::{Manifest, ManifestStore};

const BINS: usize = 128;
const WAYS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Entry {
    bundle_id: [u8; 32],
    version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionLookup {
    New,
    HaveSameOrNewer,
    HaveStrictlyNewer,
    BadManifest,
}

pub struct VersionCache {
    store: Arc<dyn ManifestStore>,
    bins: Vec<[Option<Entry>; WAYS]>,
}

impl VersionCache {
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self {
            store,
            bins: vec![[None; WAYS]; BINS],
        }
    }

    /// First 2 hex nybbles of the BID, shifted right by one.
    fn bin_index(bundle_id: &[u8; 32]) -> usize {
        (bundle_id[0] >> 1) as usize
    }

    /// `SELECT version FROM manifests WHERE id = ?`, interpreted per the
    /// candidate's declared version.
    pub fn lookup(&self, manifest: &Manifest) -> VersionLookup {
        if manifest.payload_length > 0 && manifest.payload_hash.is_empty() {
            return VersionLookup::BadManifest;
        }
        match self.store.stored_version(&manifest.bundle_id) {
            Some(stored) if stored > manifest.version => VersionLookup::HaveStrictlyNewer,
            Some(stored) if stored == manifest.version => VersionLookup::HaveSameOrNewer,
            _ => VersionLookup::New,
        }
    }

    /// Record this BID/version in the associative table.
    pub fn store(&mut self, manifest: &Manifest) {
        let idx = Self::bin_index(&manifest.bundle_id);
        let bin = &mut self.bins[idx];
        let entry = Entry {
            bundle_id: manifest.bundle_id,
            version: manifest.version,
        };

        if let Some(slot) = bin
            .iter_mut()
            .find(|slot| matches!(slot, Some(e) if e.bundle_id == manifest.bundle_id))
        {
            *slot = Some(entry);
        } else if let Some(slot) = bin.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(entry);
        } else {
            let victim = rand::thread_rng().gen_range(0..WAYS);
            bin[victim] = Some(entry);
        }

        tracing::trace!(
            bundle_id = hex::encode(manifest.bundle_id),
            version = manifest.version,
            "version cached"
        );
    }

    /// Read the associative table directly, bypassing the database. Exposed
    /// so the table's replacement policy can be tested in isolation; never
    /// called from `lookup`.
    pub fn cached_version(&self, bundle_id: &[u8; 32]) -> Option<u64> {
        let idx = Self::bin_index(bundle_id);
        self.bins[idx]
            .iter()
            .flatten()
            .find(|e| e.bundle_id == *bundle_id)
            .map(|e| e.version)
    }
}
