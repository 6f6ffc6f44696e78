//! Originator message (OGM) body.
//!
//! OGMs are the routing beacons. The body is a compact binary record: the
//! cumulative path metric, the node that transmitted this copy, and the
//! beacon generator's observations of neighbor quality. It never carries
//! user content.
//!
//! The header's origin field is never rewritten in transit, so the body
//! carries the `sender` of the current copy instead: the originator stamps
//! itself, and every forwarder rewrites the field while re-encoding. The
//! receiver's routing table learns "origin O is reachable via neighbor
//! `sender`" from exactly this pair.

use bytes::BufMut;

use crate::{NodeId, ProtocolError, Result};

/// One observed neighbor and its quality as seen by the beacon generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborQuality {
    /// The observed neighbor.
    pub id: NodeId,
    /// Cumulative path cost to reach it; lower is better.
    pub metric: u8,
}

/// OGM body.
///
/// Wire layout (big-endian): `link_metric(1) || sender_id(8) ||
/// neighbor_count(1) || count × (neighbor_id(8) || metric(1))`. The count
/// byte caps observations at 255 neighbors, far beyond any RF deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OgmBody {
    /// Cumulative path metric accumulated so far; the originator beacons 0
    /// and each accepting hop adds its receiving link's cost before
    /// re-emitting.
    pub link_metric: u8,
    /// Node that transmitted this copy. Rewritten on every forward; equals
    /// the header origin on the first hop.
    pub sender: NodeId,
    /// Neighbor quality observations of the beacon generator. Not rewritten
    /// in transit.
    pub neighbors: Vec<NeighborQuality>,
}

impl OgmBody {
    const FIXED_LEN: usize = 1 + NodeId::LEN + 1;
    const ENTRY_LEN: usize = NodeId::LEN + 1;

    /// Encode the body into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.link_metric);
        dst.put_slice(self.sender.as_bytes());
        dst.put_u8(self.neighbors.len().min(u8::MAX as usize) as u8);
        for neighbor in self.neighbors.iter().take(u8::MAX as usize) {
            dst.put_slice(neighbor.id.as_bytes());
            dst.put_u8(neighbor.metric);
        }
    }

    /// Encode into a fresh byte vector.
    #[must_use]
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(Self::FIXED_LEN + self.neighbors.len() * Self::ENTRY_LEN);
        self.encode(&mut buf);
        buf
    }

    /// Decode a body.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::BodyTruncated`] if the buffer ends before the
    ///   claimed neighbor entries
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::FIXED_LEN {
            return Err(ProtocolError::BodyTruncated {
                expected: Self::FIXED_LEN,
                actual: bytes.len(),
            });
        }

        let link_metric = bytes[0];
        let mut sender = [0u8; NodeId::LEN];
        sender.copy_from_slice(&bytes[1..1 + NodeId::LEN]);
        let count = bytes[Self::FIXED_LEN - 1] as usize;

        let expected = Self::FIXED_LEN + count * Self::ENTRY_LEN;
        if bytes.len() < expected {
            return Err(ProtocolError::BodyTruncated { expected, actual: bytes.len() });
        }

        let mut neighbors = Vec::with_capacity(count);
        for i in 0..count {
            let offset = Self::FIXED_LEN + i * Self::ENTRY_LEN;
            let mut id = [0u8; NodeId::LEN];
            id.copy_from_slice(&bytes[offset..offset + NodeId::LEN]);
            neighbors.push(NeighborQuality {
                id: NodeId::from_bytes(id),
                metric: bytes[offset + NodeId::LEN],
            });
        }

        Ok(Self { link_metric, sender: NodeId::from_bytes(sender), neighbors })
    }
}
