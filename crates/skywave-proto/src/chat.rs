//! CBOR chat payload envelope.
//!
//! Frame headers are raw binary for cheap relaying, but the chat layer's
//! payloads use CBOR for type safety and forward compatibility: field names
//! travel with the data, so old nodes skip fields they do not know.
//!
//! The envelope is versioned. Sync requests and responses ride the same DATA
//! frame type as chat text — the `type` tag inside the envelope is the only
//! discriminator, so no new mesh message type is ever needed for sync.

use serde::{Deserialize, Serialize};

use crate::{NodeId, ProtocolError, Result};

/// Version of the chat envelope this build emits.
pub const CHAT_PROTOCOL_VERSION: u8 = 1;

/// A chat channel name: `#name` for shared channels, `@CALLSIGN` for DMs.
pub type ChannelName = String;

/// Versioned chat envelope carried in a DATA frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    /// Envelope version; receivers drop versions they do not speak.
    pub protocol_version: u8,
    /// The typed payload.
    #[serde(flatten)]
    pub payload: ChatPayload,
}

/// Chat payload variants, tagged by `type` inside the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatPayload {
    /// A user-visible chat line.
    Chat(ChatMessage),
    /// Request for missing history (inventory or range mode).
    SyncRequest(SyncRequest),
    /// Rows answering a sync request.
    SyncResponse(SyncResponse),
}

/// A single chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Channel the line belongs to (`#name` or `@CALLSIGN`).
    pub channel: ChannelName,
    /// Sender's display nick.
    pub nick: String,
    /// UTF-8 message text.
    pub text: String,
    /// Sender-generated UTC creation time, unix seconds. Display ordering
    /// only — never used for transmission timing or deduplication.
    pub created_ts: u64,
}

/// Sync request modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// "What are your latest rows for this origin on this channel?"
    Inventory,
    /// "Send me this exact seqno range for this origin."
    Range,
}

/// Request for missing chat history.
///
/// Both modes are scoped to the target origin named by `origin_id_hex`.
/// Range mode carries explicit bounds; inventory mode asks for the
/// responder's last `last_n` rows for that origin so the requester can
/// derive what it lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Channel being repaired.
    pub channel: ChannelName,
    /// Which kind of answer is wanted.
    pub mode: SyncMode,
    /// Hex form of the target origin whose rows are requested.
    pub origin_id_hex: String,
    /// First seqno wanted, inclusive. Range mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    /// Last seqno wanted, inclusive. Range mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u32>,
    /// How many recent rows to enumerate. Inventory mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_n: Option<u32>,
}

impl SyncRequest {
    /// Target origin parsed from the hex field. `None` if the peer sent
    /// garbage, in which case the request is ignored.
    #[must_use]
    pub fn origin(&self) -> Option<NodeId> {
        NodeId::from_hex(&self.origin_id_hex)
    }
}

/// One stored row as carried inside a sync response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRow {
    /// Originating node of the row.
    pub origin: NodeId,
    /// Per-origin sequence number; `(origin, seqno)` is the row identity.
    pub seqno: u32,
    /// Channel the row belongs to.
    pub channel: ChannelName,
    /// Sender's display nick.
    pub nick: String,
    /// Message text.
    pub text: String,
    /// Sender-generated creation time, unix seconds.
    pub created_ts: u64,
}

/// Rows answering a sync request.
///
/// Responders chunk large answers across several of these to respect the
/// frame size limit; each chunk is independently applicable and idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Channel the rows belong to.
    pub channel: ChannelName,
    /// The rows. Applying them is idempotent.
    pub rows: Vec<SyncRow>,
}

impl ChatEnvelope {
    /// Wrap a payload in the current envelope version.
    #[must_use]
    pub fn new(payload: ChatPayload) -> Self {
        Self { protocol_version: CHAT_PROTOCOL_VERSION, payload }
    }

    /// Encode to CBOR bytes.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::CborEncode`] if serialization fails
    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::CborDecode`] on malformed CBOR or a missing tag
    /// - [`ProtocolError::UnknownVersion`] on an envelope version this build
    ///   does not speak
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = ciborium::de::from_reader(bytes)
            .map_err(|e| ProtocolError::CborDecode(e.to_string()))?;

        if envelope.protocol_version != CHAT_PROTOCOL_VERSION {
            return Err(ProtocolError::UnknownVersion(envelope.protocol_version));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_round_trip() {
        let envelope = ChatEnvelope::new(ChatPayload::Chat(ChatMessage {
            channel: "#general".into(),
            nick: "nocall".into(),
            text: "hello mesh".into(),
            created_ts: 1_700_000_000,
        }));

        let bytes = envelope.encode_to_vec().unwrap();
        assert_eq!(ChatEnvelope::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn range_request_round_trip() {
        let envelope = ChatEnvelope::new(ChatPayload::SyncRequest(SyncRequest {
            channel: "#general".into(),
            mode: SyncMode::Range,
            origin_id_hex: NodeId::from_callsign("KD9YQK-1").to_hex(),
            start: Some(142),
            end: Some(147),
            last_n: None,
        }));

        let bytes = envelope.encode_to_vec().unwrap();
        let decoded = ChatEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);

        if let ChatPayload::SyncRequest(req) = decoded.payload {
            assert_eq!(req.origin(), Some(NodeId::from_callsign("KD9YQK-1")));
        } else {
            panic!("wrong payload variant");
        }
    }

    #[test]
    fn inventory_request_round_trip() {
        let envelope = ChatEnvelope::new(ChatPayload::SyncRequest(SyncRequest {
            channel: "#general".into(),
            mode: SyncMode::Inventory,
            origin_id_hex: NodeId::from_callsign("NOCALL-1").to_hex(),
            start: None,
            end: None,
            last_n: Some(50),
        }));

        let bytes = envelope.encode_to_vec().unwrap();
        assert_eq!(ChatEnvelope::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn response_rows_round_trip() {
        let envelope = ChatEnvelope::new(ChatPayload::SyncResponse(SyncResponse {
            channel: "#general".into(),
            rows: vec![SyncRow {
                origin: NodeId::from_callsign("KD9YQK-1"),
                seqno: 142,
                channel: "#general".into(),
                nick: "kd9yqk".into(),
                text: "repaired line".into(),
                created_ts: 1_700_000_100,
            }],
        }));

        let bytes = envelope.encode_to_vec().unwrap();
        assert_eq!(ChatEnvelope::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn future_version_is_rejected() {
        let mut envelope = ChatEnvelope::new(ChatPayload::Chat(ChatMessage {
            channel: "#x".into(),
            nick: "n".into(),
            text: "t".into(),
            created_ts: 0,
        }));
        envelope.protocol_version = 99;

        let bytes = {
            let mut buf = Vec::new();
            ciborium::ser::into_writer(&envelope, &mut buf).unwrap();
            buf
        };

        assert_eq!(ChatEnvelope::decode(&bytes), Err(ProtocolError::UnknownVersion(99)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            ChatEnvelope::decode(&[0xFF, 0x13, 0x37]),
            Err(ProtocolError::CborDecode(_))
        ));
    }
}
