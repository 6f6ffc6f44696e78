//! Sans-IO engine for the Skywave mesh chat system.
//!
//! Everything here is a pure state machine in the action pattern: inputs
//! (frames, ticks, send requests) go in, actions (broadcast this frame,
//! deliver this payload, emit this event) come out, and time arrives as a
//! parameter. No sockets, no clocks, no threads — the daemon and the test
//! harness drive the same code with real and virtual resources
//! respectively.
//!
//! Layering, bottom up:
//!
//! - [`dedup`] / [`routing`] — the mesh node's two tables
//! - [`node`] — receive pipeline, OGM beacon, forwarding, send path
//! - [`store`] — idempotent chat persistence behind a trait
//! - [`gap`] / [`sync`] — sequence tracking and targeted repair
//! - [`chat`] — the client tying delivery, store, gaps and sync together
//! - [`events`] — the typed observer surface
//! - [`env`] — time/randomness abstraction for drivers

pub mod chat;
mod config;
pub mod dedup;
mod env;
mod error;
pub mod events;
pub mod gap;
pub mod node;
pub mod routing;
pub mod store;
pub mod sync;

pub use config::{
    ChannelSyncMode, ChannelSyncPolicy, ChatConfig, MeshConfig, NodeMode, RetentionConfig,
    SyncConfig,
};
pub use env::Environment;
pub use error::{NodeError, StoreError};
pub use events::{Event, EventObserver, LinkState};
