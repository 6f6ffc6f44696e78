//! Deterministic in-process mesh simulation.
//!
//! A [`MeshSim`] owns a set of Sans-IO nodes and an explicit topology and
//! shuttles broadcast frames between adjacent nodes synchronously — no
//! sockets, no tasks, no real clock. Tests drive beacons, chat sends, and
//! ticks explicitly and assert on stores, metrics, and collected events.
//!
//! Virtual time is a base instant plus an explicit offset advanced by the
//! test; the engine only ever subtracts instants, so this is exact.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bytes::Bytes;
use skywave_core::{
    ChatConfig, Event, MeshConfig, NodeMode,
    chat::{ChatAction, ChatClient, SendTarget},
    node::{MeshNode, NodeAction},
    store::MemoryStore,
};
use skywave_proto::{
    Frame, NodeId,
    chat::{ChatEnvelope, ChatMessage, ChatPayload},
    data::{DataEncodeOptions, encode_data_body},
};

/// One simulated node: mesh state machine, chat client, store, and every
/// event it has emitted.
pub struct SimNode {
    /// The node's identifier.
    pub id: NodeId,
    /// Mesh state machine.
    pub mesh: MeshNode<Instant>,
    /// Chat client over an in-memory store.
    pub chat: ChatClient<MemoryStore, Instant>,
    /// The store, for direct seeding and assertions.
    pub store: MemoryStore,
    /// Every event emitted so far, in order.
    pub events: Vec<Event>,
    outbox: VecDeque<Vec<u8>>,
}

impl SimNode {
    /// Count of collected events with the given public name.
    #[must_use]
    pub fn event_count(&self, name: &str) -> usize {
        self.events.iter().filter(|event| event.name() == name).count()
    }
}

/// The simulation world.
pub struct MeshSim {
    nodes: Vec<SimNode>,
    edges: Vec<(usize, usize)>,
    base: Instant,
    offset: Duration,
    unix: u64,
}

impl Default for MeshSim {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshSim {
    /// Maximum propagation rounds before a step is declared divergent.
    const MAX_ROUNDS: usize = 64;

    /// Create an empty world at t = 1,700,000,000 unix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            base: Instant::now(),
            offset: Duration::ZERO,
            unix: 1_700_000_000,
        }
    }

    /// Add a node with default configs in the given mode.
    ///
    /// # Panics
    ///
    /// Panics if the store rejects the client (cannot happen in memory).
    pub fn add_node(&mut self, callsign: &str, mode: NodeMode) -> usize {
        self.add_node_with(callsign, mode, MeshConfig::default())
    }

    /// Add a node with a custom mesh config.
    ///
    /// # Panics
    ///
    /// Panics if the store rejects the client (cannot happen in memory).
    pub fn add_node_with(&mut self, callsign: &str, mode: NodeMode, mesh: MeshConfig) -> usize {
        let id = NodeId::from_callsign(callsign);
        let store = MemoryStore::new();
        let chat_config = ChatConfig { node_mode: mode, ..ChatConfig::default() };
        #[allow(clippy::expect_used)]
        let chat = ChatClient::new(id, &chat_config, store.clone())
            .expect("memory store never fails");

        self.nodes.push(SimNode {
            id,
            mesh: MeshNode::new(id, mesh, 0),
            chat,
            store,
            events: Vec::new(),
            outbox: VecDeque::new(),
        });
        self.nodes.len() - 1
    }

    /// Connect two nodes bidirectionally.
    pub fn connect(&mut self, a: usize, b: usize) {
        if !self.edges.contains(&(a, b)) && !self.edges.contains(&(b, a)) {
            self.edges.push((a, b));
        }
    }

    /// Remove the link between two nodes.
    pub fn disconnect(&mut self, a: usize, b: usize) {
        self.edges.retain(|&(x, y)| !((x == a && y == b) || (x == b && y == a)));
    }

    /// Current virtual instant.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.base + self.offset
    }

    /// Current virtual unix time.
    #[must_use]
    pub fn unix_now(&self) -> u64 {
        self.unix + self.offset.as_secs()
    }

    /// Advance virtual time.
    pub fn advance(&mut self, duration: Duration) {
        self.offset += duration;
    }

    /// Immutable access to a node.
    #[must_use]
    pub fn node(&self, index: usize) -> &SimNode {
        &self.nodes[index]
    }

    /// Mutable access to a node, for direct state seeding in tests.
    #[must_use]
    pub fn node_mut(&mut self, index: usize) -> &mut SimNode {
        &mut self.nodes[index]
    }

    /// Send a chat message from a node and propagate until quiescent.
    ///
    /// # Errors
    ///
    /// Propagates mode and encoding errors from the chat client.
    pub fn send_message(
        &mut self,
        from: usize,
        channel: &str,
        text: &str,
        created_ts: u64,
    ) -> Result<(), skywave_core::NodeError> {
        let now = self.now();
        let unix = self.unix_now();

        let outbound = self.nodes[from].chat.prepare_message(channel, text, created_ts)?;
        let destination = self.resolve_target(from, outbound.target);
        let actions = self.nodes[from].mesh.send_data(
            destination,
            outbound.data_seqno,
            &outbound.payload,
            now,
        )?;
        self.apply_node_actions(from, actions);

        let actions = self.nodes[from].chat.record_sent(
            channel,
            text,
            created_ts,
            outbound.data_seqno,
            unix,
        );
        self.apply_chat_actions(from, actions);

        self.step();
        Ok(())
    }

    /// Beacon one OGM from a node and propagate.
    pub fn ogm_tick(&mut self, node: usize) {
        let now = self.now();
        let actions = self.nodes[node].mesh.ogm_tick(now);
        self.apply_node_actions(node, actions);
        self.step();
    }

    /// Run a node's chat/sync housekeeping tick and propagate.
    pub fn chat_tick(&mut self, node: usize) {
        let now = self.now();
        let actions = self.nodes[node].chat.tick(now);
        self.apply_chat_actions(node, actions);
        self.step();
    }

    /// Deliver a chat line to one node directly, as if a frame from
    /// `origin` arrived. Used to seed history without simulating the
    /// origin node itself.
    ///
    /// # Panics
    ///
    /// Panics if the synthetic payload cannot be encoded.
    pub fn inject_chat(
        &mut self,
        to: usize,
        origin: &str,
        data_seqno: u32,
        channel: &str,
        text: &str,
        created_ts: u64,
    ) {
        let envelope = ChatEnvelope::new(ChatPayload::Chat(ChatMessage {
            channel: channel.to_string(),
            nick: origin.to_lowercase(),
            text: text.to_string(),
            created_ts,
        }));
        #[allow(clippy::expect_used)]
        let payload = envelope.encode_to_vec().expect("envelope encodes");
        #[allow(clippy::expect_used)]
        let (body, flags) = encode_data_body(
            NodeId::BROADCAST,
            data_seqno,
            &payload,
            &DataEncodeOptions::default(),
        )
        .expect("body encodes");

        let now = self.now();
        let unix = self.unix_now();
        let origin_id = NodeId::from_callsign(origin);
        let actions = self.nodes[to].chat.handle_delivery(
            origin_id,
            flags,
            &Bytes::from(body),
            None,
            now,
            unix,
        );
        self.apply_chat_actions(to, actions);
        self.step();
    }

    /// Deliver raw frame bytes to one node as if received on `link`, then
    /// propagate. Used to model parallel links and retransmissions.
    pub fn deliver_raw(&mut self, to: usize, bytes: &[u8], link: &str) {
        let now = self.now();
        let actions = self.nodes[to].mesh.handle_frame(bytes, link, now);
        self.apply_node_actions(to, actions);
        self.step();
    }

    /// Propagate queued frames until the world is quiescent.
    ///
    /// # Panics
    ///
    /// Panics if propagation fails to converge, which would mean dedup or
    /// TTL enforcement is broken.
    #[allow(clippy::panic)] // test-harness crate: fail loud, fail fast
    pub fn step(&mut self) {
        for _ in 0..Self::MAX_ROUNDS {
            let mut work = Vec::new();
            for (index, node) in self.nodes.iter_mut().enumerate() {
                while let Some(bytes) = node.outbox.pop_front() {
                    work.push((index, bytes));
                }
            }
            if work.is_empty() {
                return;
            }

            for (from, bytes) in work {
                let neighbors: Vec<usize> = self
                    .edges
                    .iter()
                    .filter_map(|&(a, b)| {
                        if a == from {
                            Some(b)
                        } else if b == from {
                            Some(a)
                        } else {
                            None
                        }
                    })
                    .collect();

                for to in neighbors {
                    let link = format!("sim{from}");
                    let now = self.now();
                    let actions = self.nodes[to].mesh.handle_frame(&bytes, &link, now);
                    self.apply_node_actions(to, actions);
                }
            }
        }
        panic!("mesh propagation did not converge; dedup or TTL enforcement is broken");
    }

    fn resolve_target(&self, node: usize, target: SendTarget) -> NodeId {
        match target {
            SendTarget::Direct(id) => id,
            SendTarget::TowardOrigin(origin) => self.nodes[node]
                .mesh
                .route_next_hop(&origin)
                .unwrap_or(NodeId::BROADCAST),
        }
    }

    fn apply_node_actions(&mut self, node: usize, actions: Vec<NodeAction>) {
        let now = self.now();
        let unix = self.unix_now();

        for action in actions {
            match action {
                NodeAction::Broadcast(frame) => self.queue_frame(node, &frame),
                NodeAction::Deliver { origin, seqno: _, flags, body } => {
                    let chat_actions = self.nodes[node].chat.handle_delivery(
                        origin, flags, &body, None, now, unix,
                    );
                    self.apply_chat_actions(node, chat_actions);
                },
            }
        }
    }

    #[allow(clippy::panic)] // test-harness crate: fail loud, fail fast
    fn apply_chat_actions(&mut self, node: usize, actions: Vec<ChatAction>) {
        let now = self.now();
        for action in actions {
            match action {
                ChatAction::Emit(event) => self.nodes[node].events.push(event),
                ChatAction::Send(outbound) => {
                    let destination = self.resolve_target(node, outbound.target);
                    match self.nodes[node].mesh.send_data(
                        destination,
                        outbound.data_seqno,
                        &outbound.payload,
                        now,
                    ) {
                        Ok(actions) => self.apply_node_actions(node, actions),
                        Err(error) => panic!("sim transmit failed: {error}"),
                    }
                },
            }
        }
    }

    fn queue_frame(&mut self, node: usize, frame: &Frame) {
        #[allow(clippy::expect_used)]
        let bytes = frame.encode_to_vec().expect("sim frames fit the wire");
        self.nodes[node].outbox.push_back(bytes);
    }
}
