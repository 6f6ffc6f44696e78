//! Link layer: byte-stream transports carrying length-prefixed mesh frames.
//!
//! Every transport variant speaks the same wire framing — `u16_be_length ||
//! bytes` — whether the stream leads to an ARDOP modem or a wired TCP
//! peer. A [`Link`](link::LinkHandle) pairs an outbound queue with a
//! reconnecting I/O task; the [`Multiplexer`](mux::Multiplexer) fans
//! transmissions across every connected link and merges reception into one
//! queue tagged with the source link name.
//!
//! Per-link metrics are strictly observational: nothing in this crate or
//! above it consults them for routing or forwarding decisions.

pub mod framing;
pub mod link;
pub mod mux;
pub mod tcp;

mod error;

pub use error::LinkError;
pub use link::{LinkHandle, LinkHealth, LinkMetrics, MetricsSnapshot};
pub use mux::{InboundFrame, Multiplexer};
