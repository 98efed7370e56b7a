//! The datagram transport's external seam.
//!
//! The fetch engine never touches a raw socket itself for the datagram
//! path — framing, routing, and address abbreviation belong to the
//! overlay. The engine only needs to hand a request datagram to something
//! that knows how to reach a peer's SID.

use crate::wire::{ManifestRequest, PayloadRequest};

pub trait DatagramSink: Send + Sync {
    fn send_payload_request(&self, peer_sid: [u8; 32], request: &PayloadRequest);
    fn send_manifest_request(&self, peer_sid: [u8; 32], request: &ManifestRequest);
}
