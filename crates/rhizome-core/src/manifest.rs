//! The manifest domain type and the external collaborator traits the fetch
//! engine talks to.
//!
//! The manifest parser/verifier and the bundle database are deliberately
//! outside this crate — these traits are the seam the engine is built
//! against, so the core can be tested without either.

use std::net::SocketAddrV4;
use std::path::Path;

/// A bundle manifest, as understood by the fetch engine.
///
/// Every other manifest attribute (signature, service metadata, declared
/// recipients, ...) is opaque to the engine and lives only in whatever the
/// `ManifestVerifier`/`BundleImporter` implementations choose to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub bundle_id: [u8; 32],
    pub version: u64,
    pub payload_length: u64,
    pub payload_hash: String,
    pub self_signed: bool,
    pub ttl: u32,
}

impl Manifest {
    /// First `len` bytes of the bundle id, used for prefix-addressed
    /// datagram lookups. Clamped to 32.
    pub fn bid_prefix(&self, len: usize) -> &[u8] {
        &self.bundle_id[..len.min(32)]
    }
}

/// The bundle database, as far as the fetch engine needs to see it.
pub trait ManifestStore: Send + Sync {
    /// `SELECT version FROM manifests WHERE id = ?`
    fn stored_version(&self, bundle_id: &[u8; 32]) -> Option<u64>;

    /// `SELECT COUNT(*) FROM files WHERE id = ? AND datavalid = 1`
    fn payload_present(&self, payload_hash: &str) -> bool;
}

/// Verifies a manifest's signature/hash chain. Expensive; invoked only
/// where the queue-set admission algorithm requires it.
pub trait ManifestVerifier: Send + Sync {
    fn verify(&self, manifest: &Manifest) -> bool;
}

/// Takes ownership of a completed fetch.
pub trait BundleImporter: Send + Sync {
    /// `payload_length == 0`, or the payload was already on disk.
    fn import_manifest_only(&self, manifest: Manifest);

    /// A payload file has just been fully written at `scratch_path`.
    fn import_payload(&self, manifest: Manifest, scratch_path: &Path);

    /// A manifest-by-prefix fetch completed; re-parse the raw bytes into a
    /// `Manifest` so it can be re-submitted through the normal enqueue path.
    /// Returns `None` if the bytes do not parse as a manifest.
    fn reparse_manifest(&self, bytes: &[u8]) -> Option<Manifest>;
}

/// Where a fetch should reach a peer: a stream address if one is known,
/// plus the overlay identity used for the datagram transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub stream_addr: Option<SocketAddrV4>,
    pub sid: [u8; 32],
}
