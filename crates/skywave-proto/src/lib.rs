//! Wire codec for the Skywave mesh protocol.
//!
//! Every transmission is a mesh frame: a fixed 16-byte big-endian header
//! followed by a type-dependent body. Frame headers are raw binary so relays
//! can make forwarding decisions without touching the body; chat payloads use
//! CBOR for type safety and forward compatibility.
//!
//! The codec is pure: it performs no I/O and holds no state. Compression and
//! the opt-in payload encryption are explicit transformations applied by the
//! caller through [`data`] helpers.
//!
//! # Invariants
//!
//! - A buffer shorter than [`MeshHeader::SIZE`] or carrying an unknown
//!   version never decodes.
//! - Round-trip encoding is the identity for every defined message type and
//!   flag combination.

pub mod chat;
pub mod data;
mod errors;
mod frame;
mod header;
mod node_id;
mod ogm;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::MeshHeader;
pub use node_id::NodeId;
pub use ogm::{NeighborQuality, OgmBody};

/// Maximum total frame size on the wire.
///
/// Wire framing on every transport is `u16_be_length || bytes`, so a single
/// frame can never exceed what the length prefix can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Maximum body size: everything after the 16-byte header.
pub const MAX_BODY_LEN: usize = MAX_FRAME_LEN - MeshHeader::SIZE;

/// Mesh frame message types.
///
/// The header stores the raw byte; unrecognized values are dropped by the
/// receive pipeline without state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Periodic routing beacon (originator message).
    Ogm,
    /// Application payload addressed to a destination node.
    Data,
}

impl MessageType {
    /// Wire value of this message type.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Ogm => 0x01,
            Self::Data => 0x02,
        }
    }

    /// Parse a wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Ogm),
            0x02 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Frame header flag byte.
///
/// Bit 0 marks a deflate-compressed DATA payload, bit 1 an encrypted one.
/// Remaining bits are reserved and transmitted as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    const COMPRESSED: u8 = 0b0000_0001;
    const ENCRYPTED: u8 = 0b0000_0010;

    /// Flags with no bits set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Reconstruct from a raw header byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw header byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.0
    }

    /// Whether the body payload is deflate-compressed.
    #[must_use]
    pub const fn compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Whether the body payload is encrypted (opt-in deployments only).
    #[must_use]
    pub const fn encrypted(self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    /// Return a copy with the compressed bit set or cleared.
    #[must_use]
    pub const fn with_compressed(self, on: bool) -> Self {
        if on { Self(self.0 | Self::COMPRESSED) } else { Self(self.0 & !Self::COMPRESSED) }
    }

    /// Return a copy with the encrypted bit set or cleared.
    #[must_use]
    pub const fn with_encrypted(self, on: bool) -> Self {
        if on { Self(self.0 | Self::ENCRYPTED) } else { Self(self.0 & !Self::ENCRYPTED) }
    }
}
