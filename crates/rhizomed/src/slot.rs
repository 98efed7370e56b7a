//! Per-tier fetch slot: the dual-transport state machine.
//!
//! Each queue tier owns exactly one slot. `Scheduler::try_start_fetch`
//! (scheduler.rs) makes the synchronous admission decision described here;
//! the actual socket I/O runs as a separate Tokio task per active slot and
//! reports back to the scheduler over its command channel, so the slot
//! table itself is only ever mutated from the scheduler's own loop.

use std::path::PathBuf;
use std::time::Instant;

use rhizome_core::manifest::{Manifest, PeerAddr};

use crate::datagram::DatagramWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Connecting,
    SendingRequest,
    RxHeaders,
    RxStream,
    RxDatagram,
}

/// What a `Manifest` was moved into a slot to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Payload,
    ManifestByPrefix,
}

pub struct FetchSlot {
    pub tier_index: usize,
    pub state: SlotState,
    pub manifest: Option<Manifest>,
    pub peer: Option<PeerAddr>,
    pub kind: FetchKind,
    pub scratch_path: Option<PathBuf>,
    pub bytes_written: u64,
    pub expected_length: Option<u64>,
    pub bid_prefix: Option<Vec<u8>>,
    pub datagram: Option<DatagramWindow>,
    pub last_activity: Option<Instant>,
    /// Generation counter, bumped on every `close`. Lets a slow async task's
    /// stale completion be recognised and ignored after the slot has moved
    /// on to other work.
    pub generation: u64,
}

impl FetchSlot {
    pub fn new(tier_index: usize) -> Self {
        Self {
            tier_index,
            state: SlotState::Free,
            manifest: None,
            peer: None,
            kind: FetchKind::Payload,
            scratch_path: None,
            bytes_written: 0,
            expected_length: None,
            bid_prefix: None,
            datagram: None,
            last_activity: None,
            generation: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    pub fn active_bundle_id(&self) -> Option<[u8; 32]> {
        self.manifest.as_ref().map(|m| m.bundle_id)
    }

    pub fn active_payload_hash(&self) -> Option<&str> {
        self.manifest.as_ref().map(|m| m.payload_hash.as_str())
    }

    /// Releases every resource the slot holds and returns it to FREE. The
    /// scratch file is left for the caller to decide whether to keep
    /// (import succeeded) or delete (it didn't) — this only resets the
    /// in-memory bookkeeping.
    pub fn reset(&mut self) {
        self.state = SlotState::Free;
        self.manifest = None;
        self.peer = None;
        self.scratch_path = None;
        self.bytes_written = 0;
        self.expected_length = None;
        self.bid_prefix = None;
        self.datagram = None;
        self.last_activity = None;
        self.generation += 1;
    }
}

/// Outcomes of `try_start_fetch`. Only `Started` omits the manifest: every
/// other variant hands it back, so the compiler enforces the rule that
/// ownership transfers to the slot iff the fetch actually started.
#[derive(Debug)]
pub enum StartOutcome {
    Imported(Manifest),
    Superseded(Manifest),
    SameBundle(Manifest),
    OlderBundle(Manifest),
    NewerBundle(Manifest),
    SamePayload(Manifest),
    SlotBusy(Manifest),
    Started,
}
