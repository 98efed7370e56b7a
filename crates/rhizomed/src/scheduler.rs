//! The scheduler — the single-owner actor that drives the whole engine.
//!
//! Modelled on `summitd::chunk::ChunkManager`: one task owns every piece of
//! mutable state (the queue set, both caches, the slot table) and is driven
//! by a `tokio::select!` loop over a command channel, a retransmit/idle
//! tick, and a shutdown broadcast. Nothing outside this module ever touches
//! the queue set or the slot table directly — callers go through the
//! channel, so there is never a data race to reason about.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};

use rhizome_core::config::{RhizomeConfig, SchedulerConfig, TransportConfig};
use rhizome_core::manifest::{BundleImporter, Manifest, ManifestStore, ManifestVerifier, PeerAddr};
use rhizome_core::transport::DatagramSink;
use rhizome_core::wire::IncomingBlockHeader;
use rhizome_services::{suggest_queue, AdmitOutcome, IgnoreCache, QueueSet, VersionCache};

use crate::datagram::DatagramWindow;
use crate::slot::{FetchKind, FetchSlot, SlotState, StartOutcome};
use crate::stream::{self, StreamOutcome};

const TICK_PERIOD: Duration = Duration::from_millis(50);

pub struct SchedulerSnapshot {
    pub tier_count: usize,
    pub queued_per_tier: Vec<usize>,
    pub active_per_tier: Vec<bool>,
}

enum Command {
    SuggestQueue {
        manifest: Manifest,
        peer: PeerAddr,
        priority: i32,
        reply: oneshot::Sender<AdmitOutcome>,
    },
    ReceivedBlock {
        header: IncomingBlockHeader,
        bytes: Vec<u8>,
    },
    FetchManifestByPrefix {
        prefix: Vec<u8>,
        peer: PeerAddr,
        reply: oneshot::Sender<bool>,
    },
    AnyFetchActive {
        reply: oneshot::Sender<bool>,
    },
    AnyFetchQueued {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
    StreamFinished {
        tier_index: usize,
        generation: u64,
        outcome: StreamOutcome,
    },
}

/// Handle to the running scheduler. Cloneable and cheap — every method is
/// a channel send plus (where a reply is meaningful) an await on a oneshot.
#[derive(Clone)]
pub struct Scheduler {
    commands: mpsc::Sender<Command>,
}

impl Scheduler {
    pub fn spawn(
        config: RhizomeConfig,
        store: Arc<dyn ManifestStore>,
        verifier: Arc<dyn ManifestVerifier>,
        importer: Arc<dyn BundleImporter>,
        sink: Arc<dyn DatagramSink>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let actor = SchedulerActor::new(config, store, verifier, importer, sink, rx, shutdown);
        tokio::spawn(actor.run());
        Self { commands: tx }
    }

    pub async fn suggest_queue(&self, manifest: Manifest, peer: PeerAddr, priority: i32) -> AdmitOutcome {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .commands
            .send(Command::SuggestQueue { manifest, peer, priority, reply })
            .await;
        rx.await.unwrap_or(AdmitOutcome::Rejected)
    }

    pub async fn received_content(&self, header: IncomingBlockHeader, bytes: Vec<u8>) {
        let _ = self.commands.send(Command::ReceivedBlock { header, bytes }).await;
    }

    pub async fn fetch_request_manifest_by_prefix(&self, prefix: Vec<u8>, peer: PeerAddr) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .commands
            .send(Command::FetchManifestByPrefix { prefix, peer, reply })
            .await;
        rx.await.unwrap_or(false)
    }

    pub async fn any_fetch_active(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::AnyFetchActive { reply }).await;
        rx.await.unwrap_or(false)
    }

    pub async fn any_fetch_queued(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::AnyFetchQueued { reply }).await;
        rx.await.unwrap_or(false)
    }

    pub async fn snapshot(&self) -> Option<SchedulerSnapshot> {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Snapshot { reply }).await;
        rx.await.ok()
    }
}

struct SchedulerActor {
    scheduler_cfg: SchedulerConfig,
    transport_cfg: TransportConfig,
    store: Arc<dyn ManifestStore>,
    verifier: Arc<dyn ManifestVerifier>,
    importer: Arc<dyn BundleImporter>,
    sink: Arc<dyn DatagramSink>,
    queue: QueueSet,
    versions: VersionCache,
    ignored: IgnoreCache,
    slots: Vec<FetchSlot>,
    commands: mpsc::Receiver<Command>,
    stream_done: mpsc::Sender<Command>,
    stream_done_rx: mpsc::Receiver<Command>,
    shutdown: broadcast::Receiver<()>,
}

impl SchedulerActor {
    fn new(
        config: RhizomeConfig,
        store: Arc<dyn ManifestStore>,
        verifier: Arc<dyn ManifestVerifier>,
        importer: Arc<dyn BundleImporter>,
        sink: Arc<dyn DatagramSink>,
        commands: mpsc::Receiver<Command>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let tier_count = config.scheduler.tiers.len();
        let queue = QueueSet::new(&config.scheduler.tiers);
        let versions = VersionCache::new(store.clone());
        let ignored = IgnoreCache::new(Duration::from_millis(config.scheduler.ignore_ttl_ms));
        let slots = (0..tier_count).map(FetchSlot::new).collect();
        let (stream_done, stream_done_rx) = mpsc::channel(64);
        Self {
            scheduler_cfg: config.scheduler,
            transport_cfg: config.transport,
            store,
            verifier,
            importer,
            sink,
            queue,
            versions,
            ignored,
            slots,
            commands,
            stream_done,
            stream_done_rx,
            shutdown,
        }
    }

    async fn run(mut self) {
        let mut tick = tokio::time::interval(TICK_PERIOD);
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("scheduler shutting down");
                    return;
                }

                Some(cmd) = self.commands.recv() => {
                    self.handle(cmd);
                }

                Some(cmd) = self.stream_done_rx.recv() => {
                    self.handle(cmd);
                }

                _ = tick.tick() => {
                    self.on_tick();
                }
            }
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::SuggestQueue { manifest, peer, priority, reply } => {
                let outcome = suggest_queue(
                    &mut self.queue,
                    &self.versions,
                    &mut self.ignored,
                    self.verifier.as_ref(),
                    manifest,
                    peer,
                    priority,
                    Instant::now(),
                );
                if let AdmitOutcome::ImportNow(manifest) = &outcome {
                    self.versions.store(manifest);
                    self.importer.import_manifest_only(manifest.clone());
                }
                if let AdmitOutcome::Queued { .. } = outcome {
                    self.run_activator();
                }
                let _ = reply.send(outcome);
            }

            Command::ReceivedBlock { header, bytes } => {
                self.on_block(header, bytes);
            }

            Command::FetchManifestByPrefix { prefix, peer, reply } => {
                let started = self.try_start_manifest_by_prefix(prefix, peer);
                let _ = reply.send(started);
            }

            Command::AnyFetchActive { reply } => {
                let any = self.slots.iter().any(|s| !s.is_free());
                let _ = reply.send(any);
            }

            Command::AnyFetchQueued { reply } => {
                let _ = reply.send(self.queue.any_queued());
            }

            Command::Snapshot { reply } => {
                let queued_per_tier = (0..self.queue.tier_count())
                    .map(|i| self.queue.tier(i).iter().count())
                    .collect();
                let active_per_tier = self.slots.iter().map(|s| !s.is_free()).collect();
                let _ = reply.send(SchedulerSnapshot {
                    tier_count: self.queue.tier_count(),
                    queued_per_tier,
                    active_per_tier,
                });
            }

            Command::StreamFinished { tier_index, generation, outcome } => {
                self.on_stream_finished(tier_index, generation, outcome);
            }
        }
    }

    /// Runs the per-slot activator for every slot. Called whenever a new
    /// candidate lands in the queue: a free slot on a *larger* tier than
    /// where the candidate landed would otherwise never learn about it
    /// until its own release cascade happened to run.
    fn run_activator(&mut self) {
        for slot_index in 0..self.slots.len() {
            self.try_activate(slot_index);
        }
    }

    /// Tries to fill `slot_index`'s slot, if free, from its own tier and
    /// every tier smaller than it (lower index) in turn. Within a tier,
    /// candidates are tried in order: an `OLDERBUNDLE` result leaves the
    /// candidate queued (its newer counterpart is in flight; it's
    /// re-evaluated once that finishes) and the scan advances past it.
    /// Every other non-`Started` result means the candidate was removed
    /// from the tier's hole-free array, shifting the next candidate into
    /// the same index, so the scan re-examines that index rather than
    /// advancing.
    fn try_activate(&mut self, slot_index: usize) {
        if !self.slots[slot_index].is_free() {
            return;
        }
        for candidate_tier in 0..=slot_index {
            let capacity = self.scheduler_cfg.tiers[candidate_tier].capacity;
            let mut ci = 0;
            while ci < capacity {
                if self.queue.tier(candidate_tier).candidate(ci).is_none() {
                    break;
                }
                match self.try_start_fetch(candidate_tier, ci, slot_index) {
                    StartOutcome::Started => return,
                    StartOutcome::OlderBundle(_) => {
                        tracing::debug!(candidate_tier, ci, slot_index, "older candidate left queued behind in-flight newer fetch");
                        ci += 1;
                    }
                    other => {
                        tracing::debug!(candidate_tier, ci, slot_index, ?other, "candidate resolved without starting a fetch");
                    }
                }
            }
        }
    }

    /// The admission recheck plus dispatch for `slot_index`'s slot against
    /// the candidate at `(candidate_tier, ci)`. Most duplicate/staleness
    /// cases were already resolved at enqueue time by `suggest_queue`;
    /// what's left here is whatever changed — or whatever only another
    /// *active* slot, not the queue, can tell us — in the time the
    /// candidate sat in the queue. Every outcome except `OLDERBUNDLE`
    /// removes the candidate from its tier before returning; the in-flight
    /// fetch (if any) stays authoritative, per the duplicate-work policy.
    fn try_start_fetch(&mut self, candidate_tier: usize, ci: usize, slot_index: usize) -> StartOutcome {
        let Some(candidate) = self.queue.tier(candidate_tier).candidate(ci).cloned() else {
            return StartOutcome::Started;
        };
        let now = Instant::now();

        use rhizome_services::VersionLookup;
        if !matches!(self.versions.lookup(&candidate.manifest), VersionLookup::New) {
            self.queue.tier_mut(candidate_tier).remove(ci);
            return StartOutcome::Superseded(candidate.manifest);
        }

        if self.store.payload_present(&candidate.manifest.payload_hash) {
            self.queue.tier_mut(candidate_tier).remove(ci);
            self.versions.store(&candidate.manifest);
            self.importer.import_manifest_only(candidate.manifest.clone());
            return StartOutcome::Imported(candidate.manifest);
        }

        if let Some(active) = self
            .slots
            .iter()
            .find(|s| s.active_bundle_id() == Some(candidate.manifest.bundle_id))
        {
            let active_version = active.manifest.as_ref().map(|m| m.version).unwrap_or(0);
            return if candidate.manifest.version > active_version {
                self.queue.tier_mut(candidate_tier).remove(ci);
                StartOutcome::NewerBundle(candidate.manifest)
            } else if candidate.manifest.version == active_version {
                self.queue.tier_mut(candidate_tier).remove(ci);
                StartOutcome::SameBundle(candidate.manifest)
            } else {
                StartOutcome::OlderBundle(candidate.manifest)
            };
        }

        if self
            .slots
            .iter()
            .any(|s| s.active_payload_hash() == Some(candidate.manifest.payload_hash.as_str()))
        {
            self.queue.tier_mut(candidate_tier).remove(ci);
            return StartOutcome::SamePayload(candidate.manifest);
        }

        self.queue.tier_mut(candidate_tier).remove(ci);
        self.versions.store(&candidate.manifest);

        let slot = &mut self.slots[slot_index];
        slot.kind = FetchKind::Payload;
        slot.bid_prefix = Some(candidate.manifest.bundle_id.to_vec());
        slot.expected_length = Some(candidate.manifest.payload_length);
        slot.peer = Some(candidate.peer);
        slot.manifest = Some(candidate.manifest);
        slot.last_activity = Some(now);
        slot.state = SlotState::Connecting;

        self.dispatch_slot(slot_index);
        StartOutcome::Started
    }

    /// Tries any free slot for an out-of-band manifest-by-prefix fetch
    /// (used to chase a bundle advertised only by prefix, e.g. a rumour
    /// with no local manifest yet). Returns whether a slot was claimed.
    fn try_start_manifest_by_prefix(&mut self, prefix: Vec<u8>, peer: PeerAddr) -> bool {
        let Some(tier_index) = self.slots.iter().position(FetchSlot::is_free) else {
            return false;
        };
        let now = Instant::now();
        let slot = &mut self.slots[tier_index];
        slot.kind = FetchKind::ManifestByPrefix;
        slot.bid_prefix = Some(prefix);
        slot.peer = Some(peer);
        slot.manifest = None;
        slot.expected_length = None;
        slot.last_activity = Some(now);
        slot.state = SlotState::Connecting;
        self.dispatch_slot(tier_index);
        true
    }

    /// Spawns the stream-transport task for a freshly-claimed slot if the
    /// peer has a known stream address; otherwise goes straight to the
    /// datagram transport.
    fn dispatch_slot(&mut self, tier_index: usize) {
        let slot = &self.slots[tier_index];
        let peer = slot.peer.expect("dispatch_slot called on a claimed slot");

        if let Some(addr) = peer.stream_addr {
            let scratch_path = self.scratch_path(tier_index);
            self.slots[tier_index].scratch_path = Some(scratch_path.clone());
            self.slots[tier_index].state = SlotState::Connecting;

            let generation = self.slots[tier_index].generation;
            let request_path = match self.slots[tier_index].kind {
                FetchKind::Payload => {
                    let hash = self.slots[tier_index]
                        .manifest
                        .as_ref()
                        .map(|m| m.payload_hash.clone())
                        .unwrap_or_default();
                    format!("/rhizome/file/{hash}")
                }
                FetchKind::ManifestByPrefix => {
                    let prefix = self.slots[tier_index].bid_prefix.clone().unwrap_or_default();
                    format!("/rhizome/manifestbyprefix/{}", hex::encode(prefix))
                }
            };
            let reply = self.stream_done.clone();
            let idle_timeout = Duration::from_millis(self.transport_cfg.stream_idle_timeout_ms);

            tokio::spawn(async move {
                let outcome = stream::fetch(addr, &request_path, scratch_path, idle_timeout).await;
                let _ = reply
                    .send(Command::StreamFinished { tier_index, generation, outcome })
                    .await;
            });
        } else {
            self.fall_back_to_datagram(tier_index);
        }
    }

    fn fall_back_to_datagram(&mut self, tier_index: usize) {
        let now = Instant::now();
        let (idle_timeout, retransmit) = match self.slots[tier_index].kind {
            FetchKind::Payload => (
                Duration::from_millis(self.transport_cfg.datagram_payload_idle_timeout_ms),
                Duration::from_millis(self.transport_cfg.payload_retransmit_ms),
            ),
            FetchKind::ManifestByPrefix => (
                Duration::from_millis(self.transport_cfg.datagram_manifest_idle_timeout_ms),
                Duration::from_millis(self.transport_cfg.manifest_retransmit_ms),
            ),
        };

        let bundle_id = self.slots[tier_index]
            .manifest
            .as_ref()
            .map(|m| m.bundle_id)
            .unwrap_or([0u8; 32]);
        let version = self.slots[tier_index].manifest.as_ref().map(|m| m.version).unwrap_or(0);
        let resume_from = self.slots[tier_index].bytes_written;

        let slot = &mut self.slots[tier_index];
        slot.state = SlotState::RxDatagram;
        slot.datagram = Some(DatagramWindow::new(
            bundle_id,
            version,
            resume_from,
            retransmit,
            idle_timeout,
            now,
        ));
        slot.last_activity = Some(now);

        self.send_datagram_request(tier_index);
    }

    fn send_datagram_request(&mut self, tier_index: usize) {
        let Some(peer) = self.slots[tier_index].peer else { return };
        let kind = self.slots[tier_index].kind;
        match kind {
            FetchKind::Payload => {
                if let Some(window) = &self.slots[tier_index].datagram {
                    self.sink.send_payload_request(peer.sid, &window.build_request());
                }
            }
            FetchKind::ManifestByPrefix => {
                if let Some(prefix) = self.slots[tier_index].bid_prefix.clone() {
                    self.sink.send_manifest_request(
                        peer.sid,
                        &rhizome_core::wire::ManifestRequest { prefix },
                    );
                }
            }
        }
        if let Some(window) = &mut self.slots[tier_index].datagram {
            window.mark_retransmitted(Instant::now());
        }
    }

    fn on_stream_finished(&mut self, tier_index: usize, generation: u64, outcome: StreamOutcome) {
        if self.slots[tier_index].generation != generation {
            // Stale report from a task whose slot has already moved on.
            return;
        }
        match outcome {
            StreamOutcome::Completed { bytes_written } => {
                self.slots[tier_index].bytes_written = bytes_written;
                self.finish_slot(tier_index);
            }
            StreamOutcome::Failed { reason, bytes_written } => {
                self.slots[tier_index].bytes_written = bytes_written;
                tracing::debug!(tier_index, %reason, bytes_written, "stream transport failed, falling back to datagram");
                self.fall_back_to_datagram(tier_index);
            }
        }
    }

    fn on_block(&mut self, header: IncomingBlockHeader, bytes: Vec<u8>) {
        let Some(tier_index) = self.slots.iter().position(|s| {
            !s.is_free()
                && s.state == SlotState::RxDatagram
                && s.bid_prefix
                    .as_deref()
                    .map(|p| p.starts_with(&header.bid_prefix[..p.len().min(16)]))
                    .unwrap_or(false)
        }) else {
            return;
        };

        let now = Instant::now();
        let outcome = {
            let Some(window) = self.slots[tier_index].datagram.as_mut() else {
                return;
            };
            window.on_block(header.offset, &bytes, header.kind, now)
        };
        self.slots[tier_index].last_activity = Some(now);

        if !outcome.contiguous_bytes.is_empty() {
            self.append_scratch(tier_index, &outcome.contiguous_bytes);
        }

        if outcome.completed {
            self.finish_slot(tier_index);
        }
    }

    fn finish_slot(&mut self, tier_index: usize) {
        let slot = &mut self.slots[tier_index];
        let kind = slot.kind;
        let manifest = slot.manifest.take();
        let scratch_path = slot.scratch_path.take();

        match kind {
            FetchKind::Payload => {
                if let (Some(manifest), Some(path)) = (manifest, scratch_path) {
                    self.importer.import_payload(manifest, &path);
                }
            }
            FetchKind::ManifestByPrefix => {
                if let Some(path) = scratch_path {
                    if let Ok(bytes) = std::fs::read(&path) {
                        if let Some(manifest) = self.importer.reparse_manifest(&bytes) {
                            if let Some(peer) = self.slots[tier_index].peer {
                                let outcome = suggest_queue(
                                    &mut self.queue,
                                    &self.versions,
                                    &mut self.ignored,
                                    self.verifier.as_ref(),
                                    manifest,
                                    peer,
                                    rhizome_services::DEFAULT_PRIORITY,
                                    Instant::now(),
                                );
                                if let AdmitOutcome::ImportNow(m) = outcome {
                                    self.importer.import_manifest_only(m);
                                }
                            }
                        }
                    }
                }
            }
        }

        self.slots[tier_index].reset();
        self.try_activate(tier_index);
    }

    fn append_scratch(&mut self, tier_index: usize, bytes: &[u8]) {
        use std::io::Write;
        let Some(path) = self.slots[tier_index].scratch_path.clone().or_else(|| {
            let path = self.scratch_path(tier_index);
            self.slots[tier_index].scratch_path = Some(path.clone());
            Some(path)
        }) else {
            return;
        };
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            let _ = file.write_all(bytes);
        }
        self.slots[tier_index].bytes_written += bytes.len() as u64;
    }

    fn scratch_path(&self, tier_index: usize) -> PathBuf {
        self.scheduler_cfg
            .scratch_dir
            .join(format!("tier-{tier_index}-gen-{}", self.slots[tier_index].generation))
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        for tier_index in 0..self.slots.len() {
            if self.slots[tier_index].state != SlotState::RxDatagram {
                continue;
            }
            let idle = self.slots[tier_index]
                .datagram
                .as_ref()
                .map(|w| w.is_idle_timed_out(now))
                .unwrap_or(false);
            if idle {
                tracing::debug!(tier_index, "datagram fetch idle timeout, releasing slot");
                self.slots[tier_index].reset();
                self.try_activate(tier_index);
                continue;
            }
            let due = self.slots[tier_index]
                .datagram
                .as_ref()
                .map(|w| w.due_for_retransmit(now))
                .unwrap_or(false);
            if due {
                self.send_datagram_request(tier_index);
            }
        }
    }
}
