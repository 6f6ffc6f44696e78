//! Skywave daemon: wiring between the Sans-IO engine and the real world.
//!
//! The binary in `main.rs` parses the CLI, loads the YAML config, sets up
//! logging, and hands a typed [`config::DaemonSetup`] to
//! [`runtime::Daemon`]. Everything protocol-shaped lives in
//! `skywave-core`; this crate owns the tokio workers, the SQLite store,
//! and the event bus.

pub mod config;
pub mod event_bus;
pub mod runtime;
pub mod storage;
pub mod system_env;

mod error;

pub use error::DaemonError;
