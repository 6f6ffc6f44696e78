//! Durable chat storage.
//!
//! The [`skywave_core::store::ChatStore`] trait is implemented here over a
//! single SQLite database file. The in-memory implementation for tests
//! lives with the trait in `skywave-core`.

mod sqlite;

pub use sqlite::SqliteStore;
