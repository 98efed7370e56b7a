//! Concrete adapters wiring the fetch engine to this binary's storage.
//!
//! `rhizome-core`'s `ManifestStore`/`ManifestVerifier`/`BundleImporter`
//! traits are deliberately the engine's external seam — the manifest wire
//! format, signature scheme, and bundle database all live outside the
//! engine crate. These are the daemon's own, minimal implementations of
//! that seam: a flat-file store instead of the reference's SQL database,
//! and a line-oriented manifest encoding for re-parsing manifest-by-prefix
//! fetches. A real deployment would swap these for its own database and
//! signature scheme without touching the scheduler.

use std::path::{Path, PathBuf};

use rhizome_core::manifest::{BundleImporter, Manifest, ManifestStore, ManifestVerifier};
use rhizome_core::transport::DatagramSink;
use rhizome_core::wire::{ManifestRequest, PayloadRequest};

pub struct FsManifestStore {
    data_dir: PathBuf,
}

impl FsManifestStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn version_path(&self, bundle_id: &[u8; 32]) -> PathBuf {
        self.data_dir.join("manifests").join(hex::encode(bundle_id))
    }

    fn payload_path(&self, payload_hash: &str) -> PathBuf {
        self.data_dir.join("payloads").join(payload_hash)
    }
}

impl ManifestStore for FsManifestStore {
    fn stored_version(&self, bundle_id: &[u8; 32]) -> Option<u64> {
        let text = std::fs::read_to_string(self.version_path(bundle_id)).ok()?;
        text.lines().next()?.trim().parse().ok()
    }

    fn payload_present(&self, payload_hash: &str) -> bool {
        self.payload_path(payload_hash).is_file()
    }
}

/// Trusts self-signed manifests outright and otherwise requires a
/// non-empty payload hash. Real signature verification belongs to
/// whatever component owns the bundle's trust model, not the fetch
/// engine — see `ManifestVerifier`'s doc comment.
pub struct TrustingVerifier;

impl ManifestVerifier for TrustingVerifier {
    fn verify(&self, manifest: &Manifest) -> bool {
        manifest.self_signed || !manifest.payload_hash.is_empty()
    }
}

pub struct FsBundleImporter {
    data_dir: PathBuf,
}

impl FsBundleImporter {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn write_version(&self, manifest: &Manifest) {
        let dir = self.data_dir.join("manifests");
        if std::fs::create_dir_all(&dir).is_err() {
            return;
        }
        let path = dir.join(hex::encode(manifest.bundle_id));
        let _ = std::fs::write(&path, manifest_to_text(manifest));
    }
}

impl BundleImporter for FsBundleImporter {
    fn import_manifest_only(&self, manifest: Manifest) {
        tracing::info!(bundle_id = hex::encode(manifest.bundle_id), version = manifest.version, "imported manifest only");
        self.write_version(&manifest);
    }

    fn import_payload(&self, manifest: Manifest, scratch_path: &Path) {
        let payloads_dir = self.data_dir.join("payloads");
        if std::fs::create_dir_all(&payloads_dir).is_err() {
            return;
        }
        let dest = payloads_dir.join(&manifest.payload_hash);
        if std::fs::rename(scratch_path, &dest).is_err() {
            if std::fs::copy(scratch_path, &dest).is_ok() {
                let _ = std::fs::remove_file(scratch_path);
            }
        }
        tracing::info!(
            bundle_id = hex::encode(manifest.bundle_id),
            version = manifest.version,
            bytes = manifest.payload_length,
            "imported payload"
        );
        self.write_version(&manifest);
    }

    fn reparse_manifest(&self, bytes: &[u8]) -> Option<Manifest> {
        let text = std::str::from_utf8(bytes).ok()?;
        manifest_from_text(text)
    }
}

fn manifest_to_text(manifest: &Manifest) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n",
        hex::encode(manifest.bundle_id),
        manifest.version,
        manifest.payload_length,
        manifest.payload_hash,
        manifest.self_signed,
        manifest.ttl,
    )
}

fn manifest_from_text(text: &str) -> Option<Manifest> {
    let mut lines = text.lines();
    let bundle_id_hex = lines.next()?;
    let mut bundle_id = [0u8; 32];
    hex::decode_to_slice(bundle_id_hex, &mut bundle_id).ok()?;
    Some(Manifest {
        bundle_id,
        version: lines.next()?.trim().parse().ok()?,
        payload_length: lines.next()?.trim().parse().ok()?,
        payload_hash: lines.next()?.trim().to_string(),
        self_signed: lines.next()?.trim().parse().ok()?,
        ttl: lines.next()?.trim().parse().ok()?,
    })
}

/// A `DatagramSink` that logs rather than sends. Routing a 32-byte overlay
/// identity to a physical address is the mesh's job, not the fetch
/// engine's — a deployment wires this trait to whatever already knows how
/// to reach an SID.
pub struct LoggingDatagramSink;

impl DatagramSink for LoggingDatagramSink {
    fn send_payload_request(&self, peer_sid: [u8; 32], request: &PayloadRequest) {
        tracing::debug!(
            peer = hex::encode(peer_sid),
            bundle_id = hex::encode(request.bundle_id),
            window_start = request.window_start,
            "send payload request (no overlay route configured)"
        );
    }

    fn send_manifest_request(&self, peer_sid: [u8; 32], request: &ManifestRequest) {
        tracing::debug!(
            peer = hex::encode(peer_sid),
            prefix = hex::encode(&request.prefix),
            "send manifest request (no overlay route configured)"
        );
    }
}
