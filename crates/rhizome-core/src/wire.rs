//! Datagram wire format for the fetch transport.
//!
//! These types ARE the protocol — field order and width are part of the
//! wire format. Every multi-byte integer is big-endian, so these are
//! encode/decode helpers rather than `#[repr(C)]` overlays: a packed struct
//! would only match wire order on a big-endian host.

use static_assertions::const_assert_eq;

pub const BLOCK_SIZE: usize = 200;
pub const WINDOW_BLOCKS: u32 = 32;

/// A request for payload blocks, sent to the peer's request port.
///
/// Wire size: 54 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRequest {
    pub bundle_id: [u8; 32],
    pub version: u64,
    pub window_start: u64,
    pub bitmap: u32,
    pub block_size: u16,
}

pub const PAYLOAD_REQUEST_LEN: usize = 32 + 8 + 8 + 4 + 2;
const_assert_eq!(PAYLOAD_REQUEST_LEN, 54);

impl PayloadRequest {
    pub fn to_bytes(&self) -> [u8; PAYLOAD_REQUEST_LEN] {
        let mut buf = [0u8; PAYLOAD_REQUEST_LEN];
        buf[0..32].copy_from_slice(&self.bundle_id);
        buf[32..40].copy_from_slice(&self.version.to_be_bytes());
        buf[40..48].copy_from_slice(&self.window_start.to_be_bytes());
        buf[48..52].copy_from_slice(&self.bitmap.to_be_bytes());
        buf[52..54].copy_from_slice(&self.block_size.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < PAYLOAD_REQUEST_LEN {
            return Err(WireError::Truncated {
                expected: PAYLOAD_REQUEST_LEN,
                got: buf.len(),
            });
        }
        let mut bundle_id = [0u8; 32];
        bundle_id.copy_from_slice(&buf[0..32]);
        Ok(Self {
            bundle_id,
            version: u64::from_be_bytes(buf[32..40].try_into().unwrap()),
            window_start: u64::from_be_bytes(buf[40..48].try_into().unwrap()),
            bitmap: u32::from_be_bytes(buf[48..52].try_into().unwrap()),
            block_size: u16::from_be_bytes(buf[52..54].try_into().unwrap()),
        })
    }
}

/// A request for a manifest, identified by a BID prefix. Prefix length is
/// the datagram length itself — there is no separate length field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRequest {
    pub prefix: Vec<u8>,
}

impl ManifestRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.prefix.clone()
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            prefix: buf.to_vec(),
        }
    }
}

/// Which end of the payload an incoming block represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Body,
    Tail,
}

impl TryFrom<u8> for BlockKind {
    type Error = WireError;

    fn try_from(b: u8) -> Result<Self, WireError> {
        match b {
            b'B' => Ok(BlockKind::Body),
            b'T' => Ok(BlockKind::Tail),
            other => Err(WireError::UnknownBlockKind(other)),
        }
    }
}

impl From<BlockKind> for u8 {
    fn from(k: BlockKind) -> u8 {
        match k {
            BlockKind::Body => b'B',
            BlockKind::Tail => b'T',
        }
    }
}

/// Header preceding a block's bytes in an incoming datagram.
///
/// Wire size: 37 bytes, followed by exactly `count` payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingBlockHeader {
    pub bid_prefix: [u8; 16],
    pub version: u64,
    pub offset: u64,
    pub count: u32,
    pub kind: BlockKind,
}

pub const INCOMING_BLOCK_HEADER_LEN: usize = 16 + 8 + 8 + 4 + 1;
const_assert_eq!(INCOMING_BLOCK_HEADER_LEN, 37);

impl IncomingBlockHeader {
    pub fn to_bytes(&self) -> [u8; INCOMING_BLOCK_HEADER_LEN] {
        let mut buf = [0u8; INCOMING_BLOCK_HEADER_LEN];
        buf[0..16].copy_from_slice(&self.bid_prefix);
        buf[16..24].copy_from_slice(&self.version.to_be_bytes());
        buf[24..32].copy_from_slice(&self.offset.to_be_bytes());
        buf[32..36].copy_from_slice(&self.count.to_be_bytes());
        buf[36] = self.kind.into();
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < INCOMING_BLOCK_HEADER_LEN {
            return Err(WireError::Truncated {
                expected: INCOMING_BLOCK_HEADER_LEN,
                got: buf.len(),
            });
        }
        let mut bid_prefix = [0u8; 16];
        bid_prefix.copy_from_slice(&buf[0..16]);
        Ok(Self {
            bid_prefix,
            version: u64::from_be_bytes(buf[16..24].try_into().unwrap()),
            offset: u64::from_be_bytes(buf[24..32].try_into().unwrap()),
            count: u32::from_be_bytes(buf[32..36].try_into().unwrap()),
            kind: BlockKind::try_from(buf[36])?,
        })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("buffer too short: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("unknown block kind byte: 0x{0:02x}")]
    UnknownBlockKind(u8),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
