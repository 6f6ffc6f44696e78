//! Fixed 16-byte mesh frame header.
//!
//! All multi-byte integers are big-endian. The header carries everything a
//! relay needs for a forwarding decision — type, TTL, origin, sequence
//! number — so the body is never inspected in transit.

use crate::{FrameFlags, MessageType, NodeId, ProtocolError, Result};

/// Mesh frame header.
///
/// Wire layout (big-endian):
///
/// | offset | size | field |
/// |---|---|---|
/// | 0 | 1 | version |
/// | 1 | 1 | `message_type` |
/// | 2 | 1 | flags |
/// | 3 | 1 | ttl |
/// | 4 | 8 | `origin_id` |
/// | 12 | 4 | seqno |
///
/// The message-type byte is stored raw; [`MeshHeader::message_type`] returns
/// `None` for values this build does not recognize so the receive pipeline
/// can drop them without failing the parse.
///
/// # Invariants
///
/// - Validation order is cheapest-first: length, then version. A buffer that
///   fails either check produces no header and no state change.
/// - `(origin, seqno)` is the unique identity of a frame; forwarders never
///   rewrite either field. TTL is the only field a relay mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshHeader {
    version: u8,
    message_type: u8,
    flags: FrameFlags,
    ttl: u8,
    origin: NodeId,
    seqno: u32,
}

impl MeshHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 16;

    /// Current protocol version.
    pub const VERSION: u8 = 1;

    /// Create a header for a freshly originated frame.
    #[must_use]
    pub fn new(message_type: MessageType, ttl: u8, origin: NodeId, seqno: u32) -> Self {
        Self {
            version: Self::VERSION,
            message_type: message_type.to_u8(),
            flags: FrameFlags::empty(),
            ttl,
            origin,
            seqno,
        }
    }

    /// Parse a header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if fewer than 16 bytes are present
    /// - [`ProtocolError::UnknownVersion`] if the version byte is not ours
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        let version = bytes[0];
        if version != Self::VERSION {
            return Err(ProtocolError::UnknownVersion(version));
        }

        let mut origin = [0u8; NodeId::LEN];
        origin.copy_from_slice(&bytes[4..12]);

        // INVARIANT: the length check above guarantees bytes[12..16] exists,
        // so this conversion cannot fail.
        let seqno = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

        Ok(Self {
            version,
            message_type: bytes[1],
            flags: FrameFlags::from_byte(bytes[2]),
            ttl: bytes[3],
            origin: NodeId::from_bytes(origin),
            seqno,
        })
    }

    /// Serialize the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.version;
        out[1] = self.message_type;
        out[2] = self.flags.to_byte();
        out[3] = self.ttl;
        out[4..12].copy_from_slice(self.origin.as_bytes());
        out[12..16].copy_from_slice(&self.seqno.to_be_bytes());
        out
    }

    /// Protocol version byte.
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Message type as an enum. `None` if unrecognized.
    #[must_use]
    pub const fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// Raw message-type byte.
    #[must_use]
    pub const fn message_type_raw(&self) -> u8 {
        self.message_type
    }

    /// Frame flags.
    #[must_use]
    pub const fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Remaining hop budget, including the current hop.
    ///
    /// A frame arriving with TTL 1 may be delivered locally but is never
    /// re-emitted.
    #[must_use]
    pub const fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Originating node. Never rewritten by forwarders.
    #[must_use]
    pub const fn origin(&self) -> NodeId {
        self.origin
    }

    /// Per-origin sequence number.
    #[must_use]
    pub const fn seqno(&self) -> u32 {
        self.seqno
    }

    /// Update the flag byte.
    pub fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags;
    }

    /// Decrement TTL by one hop, saturating at zero.
    ///
    /// Forwarders call this exactly once before re-emitting.
    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
    }
}
