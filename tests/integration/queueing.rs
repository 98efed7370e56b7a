//! Admission and tiering scenarios: S1, S4, S5, S6.

use std::sync::Arc;
use std::time::Duration;

use rhizome_services::{suggest_queue, AdmitOutcome, QueueSet, VersionCache, IgnoreCache, DEFAULT_PRIORITY};
use rhizomed::scheduler::Scheduler;
use tokio::sync::broadcast;

use crate::infra::{
    self, peer_datagram_only, test_config, AlwaysVerifies, FakeStore, NullSink, RecordingImporter,
};

/// S1 — a manifest with a nil (zero-length) payload is handed straight
/// to the importer and never occupies a fetch slot.
#[tokio::test]
async fn nil_payload_manifest_is_imported_without_a_fetch() {
    let store = Arc::new(FakeStore::new());
    let verifier = Arc::new(AlwaysVerifies);
    let importer = Arc::new(RecordingImporter::new());
    let sink = Arc::new(NullSink);

    let (_tx, shutdown) = broadcast::channel(1);
    let scheduler = Scheduler::spawn(test_config(), store, verifier, importer.clone(), sink, shutdown);

    let manifest = infra::manifest(1, 1, 0, "");
    let peer = peer_datagram_only(0x01);
    let outcome = scheduler.suggest_queue(manifest, peer, DEFAULT_PRIORITY).await;

    assert!(matches!(outcome, AdmitOutcome::ImportNow(_)));
    assert_eq!(importer.manifest_only_count(), 1);
    assert!(!scheduler.any_fetch_active().await);
    assert!(!scheduler.any_fetch_queued().await);
}

/// S4 — version wins: two enqueues for the same bundle id at different
/// versions leave exactly one candidate, at the higher version. Exercised
/// directly against the queue-set admission algorithm, which is where
/// this policy is actually decided (the scheduler just calls through).
#[test]
fn higher_version_supersedes_the_queued_candidate() {
    let tiers = rhizome_core::config::default_tiers();
    let mut queue = QueueSet::new(&tiers);
    let store = Arc::new(FakeStore::new());
    let versions = VersionCache::new(store);
    let mut ignored = IgnoreCache::new(Duration::from_secs(60));
    let verifier = AlwaysVerifies;
    let peer = peer_datagram_only(0x02);
    let now = std::time::Instant::now();

    let low = infra::manifest(7, 5, 50, "hash-a");
    let outcome_low = suggest_queue(&mut queue, &versions, &mut ignored, &verifier, low, peer, DEFAULT_PRIORITY, now);
    assert!(matches!(outcome_low, AdmitOutcome::Queued { .. }));

    let high = infra::manifest(7, 7, 50, "hash-a");
    let outcome_high = suggest_queue(&mut queue, &versions, &mut ignored, &verifier, high, peer, DEFAULT_PRIORITY, now);
    assert!(matches!(outcome_high, AdmitOutcome::Queued { .. }));

    let tier_index = queue.select_tier(50).unwrap();
    let remaining: Vec<_> = queue.tier(tier_index).iter().map(|(_, c)| c.manifest.version).collect();
    assert_eq!(remaining, vec![7]);
}

/// S5 — size tiering: two payloads of very different size land in
/// different tiers and both fetch concurrently (neither waits on the
/// other's slot). Peers carry no stream address so both fall straight to
/// the datagram transport without needing a real listener.
#[tokio::test]
async fn differently_sized_payloads_fetch_in_separate_tiers_concurrently() {
    let store = Arc::new(FakeStore::new());
    let verifier = Arc::new(AlwaysVerifies);
    let importer = Arc::new(RecordingImporter::new());
    let sink = Arc::new(NullSink);

    let (_tx, shutdown) = broadcast::channel(1);
    let scheduler = Scheduler::spawn(test_config(), store, verifier, importer, sink, shutdown);

    let small = infra::manifest(10, 1, 5_000, "hash-small");
    let big = infra::manifest(20, 1, 50_000, "hash-big");
    let peer = peer_datagram_only(0x03);

    // dispatch is synchronous for the datagram transport, so both slots
    // are already active by the time these awaits return.
    scheduler.suggest_queue(small, peer, DEFAULT_PRIORITY).await;
    scheduler.suggest_queue(big, peer, DEFAULT_PRIORITY).await;

    let snapshot = scheduler.snapshot().await.expect("scheduler is alive");
    let tier_small = rhizome_core::config::default_tiers()
        .iter()
        .position(|t| t.bound.map(|b| 5_000 < b).unwrap_or(true))
        .unwrap();
    let tier_big = rhizome_core::config::default_tiers()
        .iter()
        .position(|t| t.bound.map(|b| 50_000 < b).unwrap_or(true))
        .unwrap();
    assert_ne!(tier_small, tier_big);
    assert!(snapshot.active_per_tier[tier_small]);
    assert!(snapshot.active_per_tier[tier_big]);
}

/// S6 — duplicate payload: two manifests with different bundle ids and
/// different sizes (so each gets its own tier, and so its own free slot
/// to dispatch from) but the same payload hash. The first claims its
/// tier's slot and starts fetching; the second's admission recheck finds
/// that active slot via the payload hash and drops the candidate instead
/// of starting a redundant fetch.
#[tokio::test]
async fn second_bundle_sharing_a_payload_hash_does_not_start_a_second_fetch() {
    let store = Arc::new(FakeStore::new());
    let verifier = Arc::new(AlwaysVerifies);
    let importer = Arc::new(RecordingImporter::new());
    let sink = Arc::new(NullSink);

    let (_tx, shutdown) = broadcast::channel(1);
    let scheduler = Scheduler::spawn(test_config(), store, verifier, importer, sink, shutdown);

    let peer_a = peer_datagram_only(0x0a);
    let peer_b = peer_datagram_only(0x0b);
    let first = infra::manifest(30, 1, 5_000, "shared-hash");
    let second = infra::manifest(31, 1, 50_000, "shared-hash");

    let outcome_first = scheduler.suggest_queue(first, peer_a, DEFAULT_PRIORITY).await;
    assert!(matches!(outcome_first, AdmitOutcome::Queued { .. }));
    let outcome_second = scheduler.suggest_queue(second, peer_b, DEFAULT_PRIORITY).await;
    assert!(matches!(outcome_second, AdmitOutcome::Queued { .. }));

    // try_activate runs synchronously inside the command handler before
    // the oneshot reply goes out, so by the time both awaits above
    // return, the second candidate's fate is already decided.
    assert!(!scheduler.any_fetch_queued().await);
    let snapshot = scheduler.snapshot().await.expect("scheduler is alive");
    let active_slots = snapshot.active_per_tier.iter().filter(|&&a| a).count();
    assert_eq!(active_slots, 1);
}
