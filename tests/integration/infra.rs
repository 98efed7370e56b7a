//! Shared fakes and harness helpers for the scenario tests.
//!
//! No mocking framework: plain structs implementing the engine's
//! collaborator traits, the same way the teacher's own integration tests
//! exercise real (if local) sockets rather than mocked ones.

use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rhizome_core::config::{RhizomeConfig, SchedulerConfig, TransportConfig};
use rhizome_core::manifest::{BundleImporter, Manifest, ManifestStore, ManifestVerifier, PeerAddr};
use rhizome_core::transport::DatagramSink;
use rhizome_core::wire::{ManifestRequest, PayloadRequest};

pub struct FakeStore {
    present_payloads: Mutex<HashSet<String>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self { present_payloads: Mutex::new(HashSet::new()) }
    }

    pub fn mark_present(&self, payload_hash: &str) {
        self.present_payloads.lock().unwrap().insert(payload_hash.to_string());
    }
}

impl ManifestStore for FakeStore {
    fn stored_version(&self, _bundle_id: &[u8; 32]) -> Option<u64> {
        None
    }

    fn payload_present(&self, payload_hash: &str) -> bool {
        self.present_payloads.lock().unwrap().contains(payload_hash)
    }
}

pub struct AlwaysVerifies;

impl ManifestVerifier for AlwaysVerifies {
    fn verify(&self, _manifest: &Manifest) -> bool {
        true
    }
}

#[derive(Default)]
pub struct RecordingImporter {
    pub manifest_only: Mutex<Vec<Manifest>>,
    pub payloads: Mutex<Vec<(Manifest, u64, PathBuf)>>,
}

impl RecordingImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manifest_only_count(&self) -> usize {
        self.manifest_only.lock().unwrap().len()
    }

    pub fn payload_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn last_payload_len(&self) -> Option<u64> {
        self.payloads.lock().unwrap().last().map(|(_, len, _)| *len)
    }

    pub fn last_payload_bytes(&self) -> Option<Vec<u8>> {
        let path = self.payloads.lock().unwrap().last().map(|(_, _, path)| path.clone())?;
        std::fs::read(path).ok()
    }
}

impl BundleImporter for RecordingImporter {
    fn import_manifest_only(&self, manifest: Manifest) {
        self.manifest_only.lock().unwrap().push(manifest);
    }

    fn import_payload(&self, manifest: Manifest, scratch_path: &Path) {
        let len = std::fs::metadata(scratch_path).map(|m| m.len()).unwrap_or(0);
        self.payloads.lock().unwrap().push((manifest, len, scratch_path.to_path_buf()));
    }

    fn reparse_manifest(&self, _bytes: &[u8]) -> Option<Manifest> {
        None
    }
}

pub struct NullSink;

impl DatagramSink for NullSink {
    fn send_payload_request(&self, _peer_sid: [u8; 32], _request: &PayloadRequest) {}
    fn send_manifest_request(&self, _peer_sid: [u8; 32], _request: &ManifestRequest) {}
}

pub fn manifest(bid: u8, version: u64, payload_length: u64, payload_hash: &str) -> Manifest {
    Manifest {
        bundle_id: [bid; 32],
        version,
        payload_length,
        payload_hash: payload_hash.to_string(),
        self_signed: true,
        ttl: 3600,
    }
}

pub fn peer_with_stream(addr: SocketAddrV4) -> PeerAddr {
    PeerAddr { stream_addr: Some(addr), sid: [0x11; 32] }
}

pub fn peer_datagram_only(sid: u8) -> PeerAddr {
    PeerAddr { stream_addr: None, sid: [sid; 32] }
}

/// A config with a scratch dir under the system temp dir and fast
/// transport timings, so fallback/idle-timeout scenarios don't make the
/// test suite slow.
pub fn test_config() -> RhizomeConfig {
    let scratch_dir = std::env::temp_dir().join(format!(
        "rhizome-integration-{}-{}",
        std::process::id(),
        rand_suffix()
    ));
    RhizomeConfig {
        scheduler: SchedulerConfig {
            tiers: rhizome_core::config::default_tiers(),
            scratch_dir,
            ignore_ttl_ms: 60_000,
            activator_delay_ms: 0,
        },
        transport: TransportConfig {
            stream_idle_timeout_ms: 1_000,
            datagram_payload_idle_timeout_ms: 2_000,
            datagram_manifest_idle_timeout_ms: 2_000,
            payload_retransmit_ms: 50,
            manifest_retransmit_ms: 50,
        },
    }
}

fn rand_suffix() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    std::time::Instant::now().hash(&mut hasher);
    hasher.finish()
}

/// Polls `condition` until it's true or `timeout` elapses, returning
/// whether it was ever satisfied.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
