//! Mesh node state machine.
//!
//! The central receive pipeline plus the beacon and send paths, in the
//! action pattern: every input returns the actions the driver must execute
//! (broadcast a frame, deliver a payload). The node performs no I/O and
//! holds no clock; time arrives as a parameter.
//!
//! The node is the sole mutator of the routing table and the dedup cache;
//! the driver guarantees that by calling it from a single receive worker.
//!
//! # Invariants
//!
//! - A malformed or version-mismatched frame is dropped without state
//!   change, counted in [`NodeMetrics`].
//! - A frame whose `(origin, seqno)` is already in dedup is never
//!   forwarded, delivered, or stored. First-wins across all links.
//! - Forwarding decrements TTL once; a frame at TTL 1 is never re-emitted.
//! - The node never forwards a frame it originated; its own sends are
//!   entered into dedup to suppress reflections.
//! - Delivery happens at the unicast destination or, for broadcast frames,
//!   at every node on the path; a unicast frame is never both delivered and
//!   forwarded.

use bytes::Bytes;
use skywave_proto::{
    Frame, FrameFlags, MAX_FRAME_LEN, MeshHeader, MessageType, NodeId, OgmBody,
    data::{DataEncodeOptions, NONCE_LEN, PayloadCipher, peek_destination},
};

use crate::{MeshConfig, NodeError, dedup::DedupCache, routing::RoutingTable};

/// Actions the driver executes on behalf of the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Hand a frame to the multiplexer for transmission on every link.
    Broadcast(Frame),

    /// Deliver a DATA body to the local subscriber (the chat client).
    Deliver {
        /// Frame originator.
        origin: NodeId,
        /// Mesh-level frame seqno.
        seqno: u32,
        /// Flags needed to undo payload transforms.
        flags: FrameFlags,
        /// Raw DATA body (destination, app seqno, payload).
        body: Bytes,
    },
}

/// Observational counters. Metrics never influence routing or forwarding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeMetrics {
    /// Frames dropped for truncation, bad version, or an undecodable body.
    pub malformed_frames: u64,
    /// Frames suppressed by the dedup cache.
    pub dedup_drops: u64,
    /// Frames re-emitted toward the rest of the mesh.
    pub forwarded: u64,
    /// DATA bodies delivered to the local subscriber.
    pub delivered: u64,
    /// Frames whose TTL expired here instead of being forwarded.
    pub ttl_expired: u64,
    /// Self-originated OGM beacons.
    pub ogms_sent: u64,
}

/// The mesh node.
///
/// Generic over the instant type so the harness can drive it with virtual
/// time, exactly like the other engine state machines.
pub struct MeshNode<I> {
    id: NodeId,
    config: MeshConfig,
    frame_seqno: u32,
    routing: RoutingTable<I>,
    dedup: DedupCache<I>,
    cipher: Option<PayloadCipher>,
    metrics: NodeMetrics,
}

impl<I> MeshNode<I>
where
    I: Copy + Ord + std::ops::Sub<Output = std::time::Duration>,
{
    /// Create a node.
    ///
    /// `initial_seqno` seeds the mesh frame counter; the daemon passes a
    /// wall-clock-derived value so seqnos stay fresh across restarts, the
    /// harness passes 0 for determinism.
    #[must_use]
    pub fn new(id: NodeId, config: MeshConfig, initial_seqno: u32) -> Self {
        let routing = RoutingTable::new(config.neighbor_timeout);
        let dedup = DedupCache::new(config.dedup_capacity, config.dedup_ttl);
        Self { id, config, frame_seqno: initial_seqno, routing, dedup, cipher: None, metrics: NodeMetrics::default() }
    }

    /// Enable the opt-in payload encryption with a pre-shared key.
    ///
    /// Without this call the node can neither emit nor open encrypted
    /// frames; the encrypted flag stays zero on everything it originates.
    pub fn enable_encryption(&mut self, key: &[u8; 32]) {
        self.cipher = Some(PayloadCipher::new(key));
    }

    /// This node's identifier.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Observational counters.
    #[must_use]
    pub const fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// The cipher, for the delivery path to open sealed bodies. `None`
    /// unless encryption was explicitly enabled.
    #[must_use]
    pub const fn cipher(&self) -> Option<&PayloadCipher> {
        self.cipher.as_ref()
    }

    /// Best next hop toward `origin`, if the routing table knows one.
    #[must_use]
    pub fn route_next_hop(&self, origin: &NodeId) -> Option<NodeId> {
        self.routing.route(origin).map(|route| route.next_hop)
    }

    /// Live neighbor count, for diagnostics.
    #[must_use]
    pub fn neighbor_count(&self) -> usize {
        self.routing.neighbor_count()
    }

    /// Process one inbound frame from `link`.
    ///
    /// This is the whole receive pipeline: decode, version gate, origin
    /// suppression, dedup, then dispatch by type. Errors never escape; a
    /// bad frame is a counter bump and a trace line.
    pub fn handle_frame(&mut self, bytes: &[u8], link: &str, now: I) -> Vec<NodeAction> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(error) => {
                self.metrics.malformed_frames += 1;
                tracing::trace!(%error, link, "dropping undecodable frame");
                return Vec::new();
            },
        };

        let Some(message_type) = frame.header.message_type() else {
            self.metrics.malformed_frames += 1;
            tracing::trace!(
                message_type = frame.header.message_type_raw(),
                link,
                "dropping frame with unknown message type"
            );
            return Vec::new();
        };

        let origin = frame.header.origin();
        if origin == self.id {
            // Our own frame came back around; dedup would catch it too,
            // but origin suppression must hold even after cache eviction.
            self.metrics.dedup_drops += 1;
            return Vec::new();
        }

        if self.dedup.seen_or_insert((origin, frame.header.seqno()), now) {
            self.metrics.dedup_drops += 1;
            return Vec::new();
        }

        match message_type {
            MessageType::Ogm => self.handle_ogm(frame, link, now),
            MessageType::Data => self.handle_data(&frame),
        }
    }

    /// Emit one self-originated OGM beacon.
    ///
    /// Strictly timer-driven: nothing in the receive path calls this, so
    /// received traffic can never trigger an OGM.
    pub fn ogm_tick(&mut self, now: I) -> Vec<NodeAction> {
        let seqno = self.next_frame_seqno();
        self.dedup.seen_or_insert((self.id, seqno), now);

        let body = OgmBody {
            link_metric: 0,
            sender: self.id,
            neighbors: self.routing.neighbor_observations(),
        };
        let header = MeshHeader::new(MessageType::Ogm, self.config.initial_ttl, self.id, seqno);
        self.metrics.ogms_sent += 1;

        vec![NodeAction::Broadcast(Frame::new(header, body.encode_to_vec()))]
    }

    /// Build and broadcast a DATA frame.
    ///
    /// `data_seqno` is the application-level counter the chat layer
    /// allocates and records; the mesh allocates its own frame seqno. The
    /// frame's key is entered into dedup so a reflected copy is never
    /// re-processed.
    ///
    /// # Errors
    ///
    /// - [`NodeError::Protocol`] if the payload does not fit a frame or
    ///   sealing fails
    pub fn send_data(
        &mut self,
        destination: NodeId,
        data_seqno: u32,
        payload: &[u8],
        now: I,
    ) -> Result<Vec<NodeAction>, NodeError> {
        let seqno = self.next_frame_seqno();

        let opts = DataEncodeOptions {
            compress_threshold: self.config.compress_threshold,
            seal: self.cipher.as_ref().map(|cipher| (cipher, self.derive_nonce(seqno))),
        };
        let (body, flags) =
            skywave_proto::data::encode_data_body(destination, data_seqno, payload, &opts)?;

        let mut header =
            MeshHeader::new(MessageType::Data, self.config.initial_ttl, self.id, seqno);
        header.set_flags(flags);
        let frame = Frame::new(header, body);

        if frame.encoded_len() > MAX_FRAME_LEN {
            return Err(NodeError::Protocol(skywave_proto::ProtocolError::FrameTooLarge {
                size: frame.encoded_len(),
                max: MAX_FRAME_LEN,
            }));
        }

        self.dedup.seen_or_insert((self.id, seqno), now);
        Ok(vec![NodeAction::Broadcast(frame)])
    }

    /// Periodic housekeeping: neighbor expiry and the dedup sweep.
    /// Returns neighbors dropped this round.
    pub fn expire(&mut self, now: I) -> Vec<NodeId> {
        self.dedup.sweep(now);
        let dropped = self.routing.expire(now);
        for neighbor in &dropped {
            tracing::debug!(neighbor = %neighbor, "neighbor timed out");
        }
        dropped
    }

    fn handle_ogm(&mut self, frame: Frame, link: &str, now: I) -> Vec<NodeAction> {
        let mut body = match OgmBody::decode(&frame.body) {
            Ok(body) => body,
            Err(error) => {
                self.metrics.malformed_frames += 1;
                tracing::trace!(%error, link, "dropping OGM with undecodable body");
                return Vec::new();
            },
        };

        let link_cost = self.config.link_cost.max(1);
        let metric = body.link_metric.saturating_add(link_cost);
        self.routing.observe_ogm(body.sender, frame.header.origin(), metric, link, link_cost, now);

        if frame.header.ttl() <= 1 {
            self.metrics.ttl_expired += 1;
            return Vec::new();
        }

        let mut header = frame.header;
        header.decrement_ttl();
        body.sender = self.id;
        body.link_metric = metric;
        self.metrics.forwarded += 1;

        vec![NodeAction::Broadcast(Frame::new(header, body.encode_to_vec()))]
    }

    fn handle_data(&mut self, frame: &Frame) -> Vec<NodeAction> {
        let Some(destination) = peek_destination(&frame.body) else {
            self.metrics.malformed_frames += 1;
            return Vec::new();
        };

        let mut actions = Vec::with_capacity(2);

        if destination == self.id || destination == NodeId::BROADCAST {
            self.metrics.delivered += 1;
            actions.push(NodeAction::Deliver {
                origin: frame.header.origin(),
                seqno: frame.header.seqno(),
                flags: frame.header.flags(),
                body: frame.body.clone(),
            });
        }

        // Unicast terminates at its destination; broadcast keeps going
        // while TTL remains.
        if destination != self.id {
            if frame.header.ttl() > 1 {
                let mut header = frame.header;
                header.decrement_ttl();
                self.metrics.forwarded += 1;
                actions.push(NodeAction::Broadcast(Frame::new(header, frame.body.clone())));
            } else {
                self.metrics.ttl_expired += 1;
            }
        }

        actions
    }

    fn next_frame_seqno(&mut self) -> u32 {
        self.frame_seqno = self.frame_seqno.wrapping_add(1);
        self.frame_seqno
    }

    /// Nonce for sealed payloads: origin id plus frame seqno, unique per
    /// key while seqnos are not reused.
    fn derive_nonce(&self, seqno: u32) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..8].copy_from_slice(self.id.as_bytes());
        nonce[8..].copy_from_slice(&seqno.to_be_bytes());
        nonce
    }
}
