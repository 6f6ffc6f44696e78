//! Typed engine events.
//!
//! Everything observers can learn about a running node flows through this
//! enum. Variants carry typed payloads — there are no string-keyed maps to
//! spelunk. Delivery is fire-and-forget through a bounded queue; producers
//! never block on a slow observer.

use skywave_proto::NodeId;

/// Connection state of a link, as surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// The link is up and passing frames.
    Connected,
    /// The link dropped; reconnection is being attempted.
    Reconnecting,
    /// The link is closed for good (shutdown).
    Closed,
}

/// A single engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A locally originated chat message was handed to the mesh.
    MessageSent {
        /// Channel the message was sent on.
        channel: String,
        /// Application seqno assigned to the message.
        seqno: u32,
        /// Message text.
        text: String,
        /// Sender-generated creation time, unix seconds.
        created_ts: u64,
    },

    /// A chat message arrived for this node (any mode).
    MessageReceived {
        /// Channel the message belongs to.
        channel: String,
        /// Originating node.
        origin: NodeId,
        /// Application seqno.
        seqno: u32,
        /// Sender's nick.
        nick: String,
        /// Message text.
        text: String,
        /// Sender-generated creation time, unix seconds.
        created_ts: u64,
    },

    /// A received message was newly persisted (full mode only; duplicates
    /// never raise this).
    MessageStored {
        /// Channel the row belongs to.
        channel: String,
        /// Originating node.
        origin: NodeId,
        /// Application seqno.
        seqno: u32,
    },

    /// A sequence hole met the confirmation criteria and is worth
    /// repairing. Suspected-but-unconfirmed holes never surface.
    GapDetected {
        /// Channel with the hole.
        channel: String,
        /// Origin whose sequence has the hole.
        origin: NodeId,
        /// First missing seqno, inclusive.
        start: u32,
        /// Last missing seqno, inclusive.
        end: u32,
    },

    /// A sync response was applied.
    SyncApplied {
        /// Channel that was repaired.
        channel: String,
        /// Rows newly stored by this response; duplicates don't count.
        applied_count: u32,
    },

    /// Retention pruning ran.
    PruneExecuted {
        /// Rows removed.
        removed_rows: u64,
    },

    /// A link changed connection state.
    LinkStateChange {
        /// Link name.
        link: String,
        /// New state.
        state: LinkState,
    },
}

impl Event {
    /// Stable name of this event, matching the public plugin taxonomy.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MessageSent { .. } => "on_message_sent",
            Self::MessageReceived { .. } => "on_message_received",
            Self::MessageStored { .. } => "on_message_stored",
            Self::GapDetected { .. } => "on_gap_detected",
            Self::SyncApplied { .. } => "on_sync_applied",
            Self::PruneExecuted { .. } => "on_prune_executed",
            Self::LinkStateChange { .. } => "on_link_state_change",
        }
    }
}

/// An event sink: anything that wants to observe the engine.
///
/// Implementations must not block; slow or failing observers are isolated by
/// the event bus and can never stall the RF path.
pub trait EventObserver: Send + 'static {
    /// Handle one event. Panics are caught and reported by the dispatcher.
    fn on_event(&self, event: &Event);
}
