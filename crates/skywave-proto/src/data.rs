//! DATA frame body: destination, application seqno, payload transforms.
//!
//! Clear layout: `destination_id(8) || data_seqno(4) || payload`.
//! Encrypted layout (opt-in deployments only): `destination_id(8) ||
//! data_seqno(4) || nonce(12) || ciphertext`.
//!
//! Payload transforms compose as compress-then-seal on encode and the
//! reverse on decode. Compression is attempted only above a caller-supplied
//! threshold and kept only when it actually shortens the payload; the frame
//! flags record what was applied so the receiver knows what to undo.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce, aead::Aead};

use crate::{FrameFlags, NodeId, ProtocolError, Result};

/// Fixed prefix before the payload: destination plus application seqno.
pub const DATA_PREFIX_LEN: usize = NodeId::LEN + 4;

/// AEAD nonce length for the encrypted body variant.
pub const NONCE_LEN: usize = 12;

/// Upper bound on a decompressed payload.
///
/// A hostile peer could otherwise ship a tiny frame that inflates without
/// bound. 256 KiB is far above any chat payload while keeping the worst case
/// harmless.
const MAX_DECOMPRESSED_LEN: usize = 256 * 1024;

/// Decoded clear DATA body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBody {
    /// Destination node the frame is addressed to.
    pub destination: NodeId,
    /// Application-level sequence number.
    pub data_seqno: u32,
    /// Clear application payload.
    pub payload: Bytes,
}

/// AEAD cipher for the opt-in encrypted body variant.
///
/// Holding one of these is the explicit enablement the codec requires before
/// it will emit or open encrypted frames; deployments that never construct a
/// cipher can never produce an encrypted bit on the air.
pub struct PayloadCipher {
    cipher: ChaCha20Poly1305,
}

impl PayloadCipher {
    /// Build a cipher from a 32-byte pre-shared key.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self { cipher: ChaCha20Poly1305::new(Key::from_slice(key)) }
    }

    /// Seal a payload under the given nonce.
    ///
    /// Nonces must never repeat under one key; the caller derives a fresh
    /// one per frame.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::DecryptionFailed`] if the AEAD rejects the input
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| ProtocolError::DecryptionFailed)
    }

    /// Open a sealed payload.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::DecryptionFailed`] on authentication failure
    pub fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailed)
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher").finish_non_exhaustive()
    }
}

/// Deflate `payload` if it is longer than `threshold` bytes and the result
/// is strictly shorter. Returns the bytes to transmit and whether the
/// compressed flag must be set.
#[must_use]
pub fn compress_if_shorter(payload: &[u8], threshold: usize) -> (Vec<u8>, bool) {
    if payload.len() <= threshold {
        return (payload.to_vec(), false);
    }

    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    let compressed = encoder
        .write_all(payload)
        .and_then(|()| encoder.finish())
        .unwrap_or_else(|_| payload.to_vec());

    if compressed.len() < payload.len() {
        (compressed, true)
    } else {
        (payload.to_vec(), false)
    }
}

/// Inflate a deflate-compressed payload.
///
/// # Errors
///
/// - [`ProtocolError::DecompressionFailed`] on a corrupt stream or a stream
///   that inflates past the decompression bound
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::DeflateDecoder::new(bytes).take(MAX_DECOMPRESSED_LEN as u64 + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::DecompressionFailed(e.to_string()))?;

    if out.len() > MAX_DECOMPRESSED_LEN {
        return Err(ProtocolError::DecompressionFailed(format!(
            "decompressed payload exceeds {MAX_DECOMPRESSED_LEN} bytes"
        )));
    }
    Ok(out)
}

/// Read the destination out of a DATA body without touching the payload.
///
/// Forwarding decisions need only this; relays never decompress or decrypt
/// bodies in transit. Returns `None` on a body too short to carry the
/// prefix.
#[must_use]
pub fn peek_destination(body: &[u8]) -> Option<NodeId> {
    if body.len() < DATA_PREFIX_LEN {
        return None;
    }
    let mut id = [0u8; NodeId::LEN];
    id.copy_from_slice(&body[..NodeId::LEN]);
    Some(NodeId::from_bytes(id))
}

/// Options controlling DATA body encoding.
#[derive(Debug, Default)]
pub struct DataEncodeOptions<'a> {
    /// Compression is attempted for payloads longer than this many bytes.
    pub compress_threshold: usize,
    /// Cipher and fresh nonce for the encrypted variant. `None` in normal
    /// operation; the encrypted bit is never set without it.
    pub seal: Option<(&'a PayloadCipher, [u8; NONCE_LEN])>,
}

/// Encode a DATA body, applying compression and optional sealing.
///
/// Returns the body bytes and the flags the frame header must carry.
///
/// # Errors
///
/// - [`ProtocolError::DecryptionFailed`] if sealing fails
pub fn encode_data_body(
    destination: NodeId,
    data_seqno: u32,
    payload: &[u8],
    opts: &DataEncodeOptions<'_>,
) -> Result<(Vec<u8>, FrameFlags)> {
    let (transformed, compressed) = compress_if_shorter(payload, opts.compress_threshold);
    let mut flags = FrameFlags::empty().with_compressed(compressed);

    let mut body = Vec::with_capacity(DATA_PREFIX_LEN + transformed.len() + NONCE_LEN);
    body.put_slice(destination.as_bytes());
    body.put_u32(data_seqno);

    match opts.seal {
        Some((cipher, nonce)) => {
            flags = flags.with_encrypted(true);
            body.put_slice(&nonce);
            body.put_slice(&cipher.seal(&nonce, &transformed)?);
        },
        None => body.put_slice(&transformed),
    }

    Ok((body, flags))
}

/// Decode a DATA body back to its clear form.
///
/// Forwarders never call this; only the destination inspects the body.
///
/// # Errors
///
/// - [`ProtocolError::BodyTruncated`] on a short body
/// - [`ProtocolError::EncryptionDisabled`] if the encrypted bit is set and
///   no cipher is configured
/// - [`ProtocolError::DecryptionFailed`] on authentication failure
/// - [`ProtocolError::DecompressionFailed`] on a corrupt compressed payload
pub fn decode_data_body(
    bytes: &[u8],
    flags: FrameFlags,
    cipher: Option<&PayloadCipher>,
) -> Result<DataBody> {
    if bytes.len() < DATA_PREFIX_LEN {
        return Err(ProtocolError::BodyTruncated {
            expected: DATA_PREFIX_LEN,
            actual: bytes.len(),
        });
    }

    let mut id = [0u8; NodeId::LEN];
    id.copy_from_slice(&bytes[..NodeId::LEN]);
    let destination = NodeId::from_bytes(id);
    let data_seqno = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let rest = &bytes[DATA_PREFIX_LEN..];

    let opened: Vec<u8> = if flags.encrypted() {
        let cipher = cipher.ok_or(ProtocolError::EncryptionDisabled)?;
        if rest.len() < NONCE_LEN {
            return Err(ProtocolError::BodyTruncated {
                expected: DATA_PREFIX_LEN + NONCE_LEN,
                actual: bytes.len(),
            });
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&rest[..NONCE_LEN]);
        cipher.open(&nonce, &rest[NONCE_LEN..])?
    } else {
        rest.to_vec()
    };

    let payload = if flags.compressed() { decompress(&opened)? } else { opened };

    Ok(DataBody { destination, data_seqno, payload: Bytes::from(payload) })
}
