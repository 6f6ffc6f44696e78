//! Chat client: the layer between mesh delivery and the persistent store.
//!
//! Outbound, it builds chat envelopes and allocates the per-origin
//! application seqno. Inbound, it decodes delivered DATA bodies, runs the
//! idempotent store path, feeds the gap detector, and services sync
//! requests. Node mode gates everything local: a relay or monitor decodes
//! only enough to emit observational events and never stores or syncs.
//!
//! Application seqnos count chat lines only. Control traffic (sync
//! requests and responses) travels with `data_seqno` 0 so receivers' gap
//! detectors see an unbroken chat sequence.

use bytes::Bytes;
use skywave_proto::{
    FrameFlags, NodeId,
    chat::{ChatEnvelope, ChatMessage, ChatPayload},
    data::{PayloadCipher, decode_data_body},
};

use crate::{
    ChatConfig, NodeMode,
    error::{NodeError, StoreError},
    events::Event,
    gap::{ConfirmedGap, GapDetector},
    store::{ChatRow, ChatStore, InsertOutcome},
    sync::SyncEngine,
};

/// Where an outbound DATA payload should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// A concrete destination (a node, or the broadcast address).
    Direct(NodeId),
    /// Repair traffic aimed at whoever holds history for this origin: the
    /// driver unicasts to the best next hop toward it, or broadcasts when
    /// no route is known.
    TowardOrigin(NodeId),
}

/// An outbound DATA payload the driver hands to the mesh node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundData {
    /// Addressing for the frame.
    pub target: SendTarget,
    /// Application seqno to stamp into the DATA body.
    pub data_seqno: u32,
    /// Encoded chat envelope.
    pub payload: Vec<u8>,
}

/// Actions the chat client produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    /// Send this payload through the mesh.
    Send(OutboundData),
    /// Publish an event to observers.
    Emit(Event),
}

/// The chat client.
pub struct ChatClient<S, I> {
    id: NodeId,
    nick: String,
    mode: NodeMode,
    store: S,
    gaps: GapDetector<I>,
    sync: SyncEngine<I>,
    last_data_seqno: u32,
}

impl<S, I> ChatClient<S, I>
where
    S: ChatStore,
    I: Copy + Ord + std::ops::Sub<Output = std::time::Duration>,
{
    /// Create a client, restoring the outbound seqno counter from the
    /// store so seqnos are never reused across restarts.
    ///
    /// # Errors
    ///
    /// - [`StoreError`] if the counter restore fails
    pub fn new(id: NodeId, config: &ChatConfig, store: S) -> Result<Self, StoreError> {
        let last_data_seqno =
            if config.node_mode.stores_chat() { store.last_seqno(&id)?.unwrap_or(0) } else { 0 };

        let nick =
            if config.nick.is_empty() { id.callsign().to_lowercase() } else { config.nick.clone() };

        Ok(Self {
            id,
            nick,
            mode: config.node_mode,
            store,
            gaps: GapDetector::new(config.sync.confirm_margin, config.sync.confirm_timeout),
            sync: SyncEngine::new(config.sync.clone()),
            last_data_seqno,
        })
    }

    /// Node mode this client runs in.
    #[must_use]
    pub const fn mode(&self) -> NodeMode {
        self.mode
    }

    /// Build an outbound chat message.
    ///
    /// The returned seqno is *reserved*, not committed: the driver sends
    /// the payload through the mesh first and calls
    /// [`ChatClient::record_sent`] on success. One send completes before
    /// the next is prepared (the driver runs a single chat worker), so
    /// reserved seqnos never collide.
    ///
    /// # Errors
    ///
    /// - [`NodeError::WrongMode`] unless the node is in full mode
    /// - [`NodeError::InvalidChannel`] for a malformed channel name
    /// - [`NodeError::Protocol`] if envelope encoding fails
    pub fn prepare_message(
        &self,
        channel: &str,
        text: &str,
        created_ts: u64,
    ) -> Result<OutboundData, NodeError> {
        if !self.mode.originates_chat() {
            return Err(NodeError::WrongMode { mode: self.mode.as_str() });
        }
        let destination = channel_destination(channel)?;
        let data_seqno = self.last_data_seqno + 1;

        let envelope = ChatEnvelope::new(ChatPayload::Chat(ChatMessage {
            channel: channel.to_string(),
            nick: self.nick.clone(),
            text: text.to_string(),
            created_ts,
        }));

        Ok(OutboundData {
            target: SendTarget::Direct(destination),
            data_seqno,
            payload: envelope.encode_to_vec()?,
        })
    }

    /// Commit a sent message: advance the counter, store our own copy
    /// (full mode), and raise `on_message_sent`.
    pub fn record_sent(
        &mut self,
        channel: &str,
        text: &str,
        created_ts: u64,
        data_seqno: u32,
        local_unix: u64,
    ) -> Vec<ChatAction> {
        self.last_data_seqno = data_seqno;

        let mut actions = Vec::new();
        if self.mode.stores_chat() {
            let row = ChatRow {
                origin: self.id,
                seqno: data_seqno,
                channel: channel.to_string(),
                nick: self.nick.clone(),
                text: text.to_string(),
                created_ts,
                local_insert_ts: local_unix,
            };
            match self.store.insert(&row) {
                Ok(_) => {},
                Err(error) => {
                    tracing::warn!(%error, "failed to store own message");
                },
            }
        }

        actions.push(ChatAction::Emit(Event::MessageSent {
            channel: channel.to_string(),
            seqno: data_seqno,
            text: text.to_string(),
            created_ts,
        }));
        actions
    }

    /// Process a DATA body the mesh delivered to this node.
    ///
    /// Errors never escape: an undecodable payload is a trace line and a
    /// drop, exactly like the mesh receive path.
    pub fn handle_delivery(
        &mut self,
        origin: NodeId,
        flags: FrameFlags,
        body: &Bytes,
        cipher: Option<&PayloadCipher>,
        now: I,
        local_unix: u64,
    ) -> Vec<ChatAction> {
        let data = match decode_data_body(body, flags, cipher) {
            Ok(data) => data,
            Err(error) => {
                tracing::trace!(%error, origin = %origin, "dropping undecodable DATA body");
                return Vec::new();
            },
        };

        let envelope = match ChatEnvelope::decode(&data.payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::trace!(%error, origin = %origin, "dropping undecodable chat payload");
                return Vec::new();
            },
        };

        match envelope.payload {
            ChatPayload::Chat(message) => {
                self.handle_chat(origin, data.data_seqno, message, now, local_unix)
            },
            ChatPayload::SyncRequest(request) => self.handle_sync_request(origin, &request, now),
            ChatPayload::SyncResponse(response) => {
                self.handle_sync_response(&response.channel, response.rows, now, local_unix)
            },
        }
    }

    /// Periodic tick: time-based gap confirmation and due sync requests.
    pub fn tick(&mut self, now: I) -> Vec<ChatAction> {
        if !self.mode.stores_chat() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        let confirmed = self.gaps.tick(now);
        self.enqueue_confirmed(confirmed, &mut actions);

        for planned in self.sync.due_requests(now) {
            let envelope = ChatEnvelope::new(ChatPayload::SyncRequest(planned.request));
            match envelope.encode_to_vec() {
                Ok(payload) => actions.push(ChatAction::Send(OutboundData {
                    target: SendTarget::TowardOrigin(planned.origin),
                    data_seqno: 0,
                    payload,
                })),
                Err(error) => tracing::warn!(%error, "failed to encode sync request"),
            }
        }
        actions
    }

    /// Ask a channel for its recent history for `origin` (inventory mode).
    /// Used when this node has no baseline to detect gaps against.
    pub fn request_inventory(&mut self, channel: &str, origin: NodeId) {
        if self.mode.stores_chat() {
            self.sync.note_inventory(channel, origin);
        }
    }

    fn handle_chat(
        &mut self,
        origin: NodeId,
        data_seqno: u32,
        message: ChatMessage,
        now: I,
        local_unix: u64,
    ) -> Vec<ChatAction> {
        let mut actions = vec![ChatAction::Emit(Event::MessageReceived {
            channel: message.channel.clone(),
            origin,
            seqno: data_seqno,
            nick: message.nick.clone(),
            text: message.text.clone(),
            created_ts: message.created_ts,
        })];

        if !self.mode.stores_chat() || data_seqno == 0 {
            return actions;
        }

        let row = ChatRow {
            origin,
            seqno: data_seqno,
            channel: message.channel.clone(),
            nick: message.nick,
            text: message.text,
            created_ts: message.created_ts,
            local_insert_ts: local_unix,
        };

        match self.store.insert(&row) {
            Ok(InsertOutcome::Inserted) => {
                actions.push(ChatAction::Emit(Event::MessageStored {
                    channel: message.channel.clone(),
                    origin,
                    seqno: data_seqno,
                }));
                let confirmed = self.gaps.observe(&message.channel, origin, data_seqno, now);
                self.enqueue_confirmed(confirmed, &mut actions);
                self.sync.note_filled(&message.channel, origin, data_seqno);
            },
            Ok(InsertOutcome::Duplicate) => {},
            Err(StoreError::Busy) => {
                tracing::warn!(origin = %origin, seqno = data_seqno, "store busy, dropping row");
            },
            Err(error) => {
                tracing::warn!(%error, "store insert failed");
            },
        }
        actions
    }

    fn handle_sync_request(
        &mut self,
        requester: NodeId,
        request: &skywave_proto::chat::SyncRequest,
        now: I,
    ) -> Vec<ChatAction> {
        if !self.mode.stores_chat() {
            return Vec::new();
        }

        let responses = match self.sync.answer_request(request, requester, &self.store, now) {
            Ok(responses) => responses,
            Err(error) => {
                tracing::warn!(%error, "sync responder store lookup failed");
                return Vec::new();
            },
        };

        let mut actions = Vec::new();
        for response in responses {
            let envelope = ChatEnvelope::new(ChatPayload::SyncResponse(response));
            match envelope.encode_to_vec() {
                Ok(payload) => actions.push(ChatAction::Send(OutboundData {
                    target: SendTarget::Direct(requester),
                    data_seqno: 0,
                    payload,
                })),
                Err(error) => tracing::warn!(%error, "failed to encode sync response"),
            }
        }
        actions
    }

    fn handle_sync_response(
        &mut self,
        channel: &str,
        rows: Vec<skywave_proto::chat::SyncRow>,
        now: I,
        local_unix: u64,
    ) -> Vec<ChatAction> {
        if !self.mode.stores_chat() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        let mut applied = 0u32;

        for row in rows {
            if row.seqno == 0 {
                continue;
            }
            let stored = ChatRow {
                origin: row.origin,
                seqno: row.seqno,
                channel: row.channel.clone(),
                nick: row.nick,
                text: row.text,
                created_ts: row.created_ts,
                local_insert_ts: local_unix,
            };
            match self.store.insert(&stored) {
                Ok(InsertOutcome::Inserted) => {
                    applied += 1;
                    let confirmed = self.gaps.observe(&row.channel, row.origin, row.seqno, now);
                    self.enqueue_confirmed(confirmed, &mut actions);
                    self.sync.note_filled(&row.channel, row.origin, row.seqno);
                },
                Ok(InsertOutcome::Duplicate) => {
                    self.sync.note_filled(&row.channel, row.origin, row.seqno);
                },
                Err(error) => {
                    tracing::warn!(%error, "sync apply insert failed");
                },
            }
        }

        actions.push(ChatAction::Emit(Event::SyncApplied {
            channel: channel.to_string(),
            applied_count: applied,
        }));
        actions
    }

    fn enqueue_confirmed(&mut self, confirmed: Vec<ConfirmedGap>, actions: &mut Vec<ChatAction>) {
        for gap in confirmed {
            self.sync.note_gap(&gap);
            actions.push(ChatAction::Emit(Event::GapDetected {
                channel: gap.channel,
                origin: gap.origin,
                start: gap.start,
                end: gap.end,
            }));
        }
    }
}

/// Map a channel name to its mesh destination: channels broadcast, DMs
/// unicast to the named callsign.
///
/// # Errors
///
/// - [`NodeError::InvalidChannel`] unless the name is `#name` or
///   `@CALLSIGN`
pub fn channel_destination(channel: &str) -> Result<NodeId, NodeError> {
    if let Some(callsign) = channel.strip_prefix('@') {
        if callsign.is_empty() {
            return Err(NodeError::InvalidChannel(channel.to_string()));
        }
        return Ok(NodeId::from_callsign(callsign));
    }
    if channel.len() > 1 && channel.starts_with('#') {
        return Ok(NodeId::BROADCAST);
    }
    Err(NodeError::InvalidChannel(channel.to_string()))
}
