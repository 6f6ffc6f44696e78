//! Frame type combining header and body.
//!
//! A `Frame` is the unit handed to the link layer: 16-byte raw binary header
//! plus a variable-length body that is already encoded (and possibly
//! compressed or sealed). Relays operate on the header alone.

use bytes::{BufMut, Bytes};

use crate::{MAX_BODY_LEN, MAX_FRAME_LEN, MeshHeader, ProtocolError, Result};

/// Complete mesh frame.
///
/// Wire layout: `[MeshHeader: 16 bytes] + [body: variable]`. The transport
/// prepends a `u16_be` length, so the encoded size is capped at
/// [`MAX_FRAME_LEN`].
///
/// # Invariants
///
/// - `body.len()` never exceeds [`MAX_BODY_LEN`]; violations are rejected at
///   encode time rather than silently truncated.
/// - Decoding consumes the whole buffer: the transport's length prefix
///   delimits exactly one frame, so trailing bytes belong to the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (16 bytes on the wire).
    pub header: MeshHeader,
    /// Raw body bytes, interpretation depends on the header's message type.
    pub body: Bytes,
}

impl Frame {
    /// Create a frame from a header and an already-encoded body.
    #[must_use]
    pub fn new(header: MeshHeader, body: impl Into<Bytes>) -> Self {
        Self { header, body: body.into() }
    }

    /// Encoded size of this frame on the wire, excluding the length prefix.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        MeshHeader::SIZE + self.body.len()
    }

    /// Encode the frame into `dst`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooLarge`] if the result would not fit the
    ///   `u16` wire length prefix
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let total = self.encoded_len();
        if total > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge { size: total, max: MAX_FRAME_LEN });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.body);
        Ok(())
    }

    /// Encode into a fresh byte vector.
    ///
    /// # Errors
    ///
    /// Same as [`Frame::encode`].
    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode one frame from a length-delimited buffer.
    ///
    /// The transport's length prefix bounds `bytes` to a single frame, so
    /// everything after the header is the body.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] / [`ProtocolError::UnknownVersion`]
    ///   from header parsing
    /// - [`ProtocolError::FrameTooLarge`] if the buffer exceeds the wire
    ///   limit (a transport bug, not a peer one)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge { size: bytes.len(), max: MAX_FRAME_LEN });
        }

        let header = MeshHeader::from_bytes(bytes)?;
        let body = Bytes::copy_from_slice(&bytes[MeshHeader::SIZE..]);

        debug_assert!(body.len() <= MAX_BODY_LEN);

        Ok(Self { header, body })
    }
}
