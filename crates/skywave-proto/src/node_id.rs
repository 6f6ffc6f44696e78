//! Node identifiers derived from radio callsigns.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque 8-byte node identifier used verbatim as the origin and destination
/// field of every mesh frame.
///
/// Derived deterministically from an ASCII callsign: uppercased, right-padded
/// with `0x20`, truncated to 8 bytes. Two derivations of the same callsign
/// compare equal; this is the single place the encoding is defined.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 8]);

impl NodeId {
    /// Identifier length in bytes.
    pub const LEN: usize = 8;

    /// The all-nodes destination. Frames addressed here are delivered by
    /// every node on the path and forwarded while TTL remains; channel
    /// traffic uses it. No callsign derives to this value (0xFF is not
    /// ASCII).
    pub const BROADCAST: Self = Self([0xFF; 8]);

    /// Derive an identifier from a callsign.
    ///
    /// Lowercase ASCII is folded to uppercase, the result is truncated to 8
    /// bytes and right-padded with spaces. Non-ASCII input is not rejected
    /// here; callsigns are operator-supplied configuration and validated at
    /// the daemon boundary.
    #[must_use]
    pub fn from_callsign(callsign: &str) -> Self {
        let mut id = [0x20u8; Self::LEN];
        for (slot, byte) in id.iter_mut().zip(callsign.bytes()) {
            *slot = byte.to_ascii_uppercase();
        }
        Self(id)
    }

    /// Reconstruct from the raw wire bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Raw wire bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Lowercase hex form, as carried in sync request payloads.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form back into an identifier.
    ///
    /// Returns `None` if the input is not exactly 16 hex digits.
    #[must_use]
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        let array: [u8; Self::LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// The callsign this identifier was derived from, trailing pad stripped.
    ///
    /// Non-printable bytes render as `.` so a corrupt identifier stays
    /// loggable.
    #[must_use]
    pub fn callsign(&self) -> String {
        let trimmed = self.0.iter().rev().skip_while(|&&b| b == 0x20).count();
        self.0[..trimmed]
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.callsign())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.callsign())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(NodeId::from_callsign("KD9YQK-1"), NodeId::from_callsign("KD9YQK-1"));
        assert_eq!(NodeId::from_callsign("kd9yqk-1"), NodeId::from_callsign("KD9YQK-1"));
    }

    #[test]
    fn short_callsign_is_space_padded() {
        let id = NodeId::from_callsign("W1AW");
        assert_eq!(id.as_bytes(), b"W1AW    ");
        assert_eq!(id.callsign(), "W1AW");
    }

    #[test]
    fn long_callsign_is_truncated() {
        let id = NodeId::from_callsign("VERYLONGCALL");
        assert_eq!(id.as_bytes(), b"VERYLONG");
    }

    #[test]
    fn hex_round_trip() {
        let id = NodeId::from_callsign("NOCALL-1");
        assert_eq!(NodeId::from_hex(&id.to_hex()), Some(id));
        assert_eq!(NodeId::from_hex("zz"), None);
        assert_eq!(NodeId::from_hex("00"), None);
    }

    #[test]
    fn display_matches_callsign() {
        assert_eq!(NodeId::from_callsign("nocall-1").to_string(), "NOCALL-1");
    }
}
