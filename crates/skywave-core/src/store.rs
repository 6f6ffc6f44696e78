//! Chat store abstraction.
//!
//! Trait-based persistence for chat rows. The trait is synchronous and
//! implementations must be cheap to clone (shared state behind an Arc), so
//! they can be handed to the chat client and the sync responder alike. The
//! daemon provides a SQLite implementation; tests and the harness use
//! [`MemoryStore`].
//!
//! The store is not part of the mesh forwarding path — dedup is handled
//! upstream by the dedup cache. The store's own `(origin, seqno)` key is the
//! idempotency contract for the chat layer.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use skywave_proto::NodeId;

use crate::error::StoreError;

/// Result of an insert: the idempotent-duplicate path is an outcome, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was newly persisted.
    Inserted,
    /// A row with this `(origin, seqno)` already existed; nothing changed.
    Duplicate,
}

/// One stored chat row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRow {
    /// Originating node.
    pub origin: NodeId,
    /// Per-origin application seqno. `(origin, seqno)` is the natural key.
    pub seqno: u32,
    /// Channel the row belongs to.
    pub channel: String,
    /// Sender's display nick.
    pub nick: String,
    /// Message text.
    pub text: String,
    /// Sender-generated creation time, unix seconds. Display ordering only.
    pub created_ts: u64,
    /// When this node persisted the row, unix seconds.
    pub local_insert_ts: u64,
}

/// Idempotent persistent map of chat rows keyed by `(origin, seqno)`.
///
/// Writes are durable before `insert` returns. Display ordering is
/// `created_ts` ascending with `(origin, seqno)` as the deterministic
/// tie-break.
pub trait ChatStore: Clone + Send + Sync + 'static {
    /// Insert a row, or do nothing if its key already exists.
    fn insert(&self, row: &ChatRow) -> Result<InsertOutcome, StoreError>;

    /// Rows for `(channel, origin)` with seqno in `[start, end]`, seqno
    /// ascending.
    fn get_range(
        &self,
        channel: &str,
        origin: &NodeId,
        start: u32,
        end: u32,
    ) -> Result<Vec<ChatRow>, StoreError>;

    /// Highest seqno stored for `(channel, origin)`, if any.
    fn max_seqno(&self, channel: &str, origin: &NodeId) -> Result<Option<u32>, StoreError>;

    /// Highest seqno stored for `origin` across all channels. Restores the
    /// outbound counter after a restart.
    fn last_seqno(&self, origin: &NodeId) -> Result<Option<u32>, StoreError>;

    /// The most recent `limit` rows for `(channel, origin)` by
    /// `(created_ts, seqno)`, newest last. Feeds the inventory responder;
    /// inventory is origin-scoped like every other sync mode.
    fn latest_rows(
        &self,
        channel: &str,
        origin: &NodeId,
        limit: usize,
    ) -> Result<Vec<ChatRow>, StoreError>;

    /// All channels with at least one row.
    fn list_channels(&self) -> Result<Vec<String>, StoreError>;

    /// Every row on a channel in display order.
    fn export(&self, channel: &str) -> Result<Vec<ChatRow>, StoreError>;

    /// Delete rows with `created_ts` before `cutoff_ts`. Returns how many
    /// were removed.
    fn prune_older_than(&self, cutoff_ts: u64) -> Result<u64, StoreError>;
}

/// In-memory store for tests and simulation.
///
/// A `BTreeMap` keyed by `(origin, seqno)` keeps range queries simple.
/// Clones share state through the Arc, mirroring how the SQLite store
/// shares its connection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<BTreeMap<([u8; 8], u32), ChatRow>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total row count, for test assertions.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.lock().len()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<([u8; 8], u32), ChatRow>> {
        // Poisoning only happens if a test thread panicked mid-write.
        self.inner.lock().expect("memory store mutex poisoned")
    }
}

fn display_order(a: &ChatRow, b: &ChatRow) -> std::cmp::Ordering {
    a.created_ts
        .cmp(&b.created_ts)
        .then_with(|| a.origin.as_bytes().cmp(b.origin.as_bytes()))
        .then_with(|| a.seqno.cmp(&b.seqno))
}

impl ChatStore for MemoryStore {
    fn insert(&self, row: &ChatRow) -> Result<InsertOutcome, StoreError> {
        let mut rows = self.lock();
        let key = (*row.origin.as_bytes(), row.seqno);
        if rows.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.insert(key, row.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn get_range(
        &self,
        channel: &str,
        origin: &NodeId,
        start: u32,
        end: u32,
    ) -> Result<Vec<ChatRow>, StoreError> {
        let rows = self.lock();
        Ok(rows
            .range((*origin.as_bytes(), start)..=(*origin.as_bytes(), end))
            .map(|(_, row)| row)
            .filter(|row| row.channel == channel)
            .cloned()
            .collect())
    }

    fn max_seqno(&self, channel: &str, origin: &NodeId) -> Result<Option<u32>, StoreError> {
        let rows = self.lock();
        Ok(rows
            .range((*origin.as_bytes(), 0)..=(*origin.as_bytes(), u32::MAX))
            .map(|(_, row)| row)
            .filter(|row| row.channel == channel)
            .map(|row| row.seqno)
            .max())
    }

    fn last_seqno(&self, origin: &NodeId) -> Result<Option<u32>, StoreError> {
        let rows = self.lock();
        Ok(rows
            .range((*origin.as_bytes(), 0)..=(*origin.as_bytes(), u32::MAX))
            .map(|(key, _)| key.1)
            .max())
    }

    fn latest_rows(
        &self,
        channel: &str,
        origin: &NodeId,
        limit: usize,
    ) -> Result<Vec<ChatRow>, StoreError> {
        let rows = self.lock();
        let mut matching: Vec<ChatRow> = rows
            .values()
            .filter(|row| row.channel == channel && row.origin == *origin)
            .cloned()
            .collect();
        matching.sort_by(display_order);
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.split_off(skip))
    }

    fn list_channels(&self) -> Result<Vec<String>, StoreError> {
        let rows = self.lock();
        let mut channels: Vec<String> = rows.values().map(|row| row.channel.clone()).collect();
        channels.sort();
        channels.dedup();
        Ok(channels)
    }

    fn export(&self, channel: &str) -> Result<Vec<ChatRow>, StoreError> {
        let rows = self.lock();
        let mut matching: Vec<ChatRow> =
            rows.values().filter(|row| row.channel == channel).cloned().collect();
        matching.sort_by(display_order);
        Ok(matching)
    }

    fn prune_older_than(&self, cutoff_ts: u64) -> Result<u64, StoreError> {
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|_, row| row.created_ts >= cutoff_ts);
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(callsign: &str, seqno: u32, channel: &str, created_ts: u64) -> ChatRow {
        ChatRow {
            origin: NodeId::from_callsign(callsign),
            seqno,
            channel: channel.into(),
            nick: callsign.to_lowercase(),
            text: format!("message {seqno}"),
            created_ts,
            local_insert_ts: created_ts + 5,
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let store = MemoryStore::new();
        let r = row("NOCALL-1", 1, "#general", 1_700_000_000);

        assert_eq!(store.insert(&r).unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&r).unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn duplicate_key_different_content_is_still_duplicate() {
        let store = MemoryStore::new();
        store.insert(&row("NOCALL-1", 1, "#general", 100)).unwrap();

        let mut conflicting = row("NOCALL-1", 1, "#general", 100);
        conflicting.text = "rewritten history".into();
        assert_eq!(store.insert(&conflicting).unwrap(), InsertOutcome::Duplicate);
        // First write wins.
        let stored = store.export("#general").unwrap();
        assert_eq!(stored[0].text, "message 1");
    }

    #[test]
    fn range_query_filters_channel_and_bounds() {
        let store = MemoryStore::new();
        for seqno in 1..=10 {
            store.insert(&row("KD9YQK-1", seqno, "#general", 1000 + u64::from(seqno))).unwrap();
        }
        store.insert(&row("KD9YQK-1", 11, "#other", 2000)).unwrap();

        let origin = NodeId::from_callsign("KD9YQK-1");
        let rows = store.get_range("#general", &origin, 3, 5).unwrap();
        assert_eq!(rows.iter().map(|r| r.seqno).collect::<Vec<_>>(), vec![3, 4, 5]);

        assert!(store.get_range("#other", &origin, 1, 10).unwrap().is_empty());
    }

    #[test]
    fn max_and_last_seqno() {
        let store = MemoryStore::new();
        store.insert(&row("KD9YQK-1", 4, "#general", 100)).unwrap();
        store.insert(&row("KD9YQK-1", 9, "#other", 200)).unwrap();

        let origin = NodeId::from_callsign("KD9YQK-1");
        assert_eq!(store.max_seqno("#general", &origin).unwrap(), Some(4));
        assert_eq!(store.last_seqno(&origin).unwrap(), Some(9));
        assert_eq!(store.last_seqno(&NodeId::from_callsign("W1AW")).unwrap(), None);
    }

    #[test]
    fn display_order_is_created_ts_then_key() {
        let store = MemoryStore::new();
        store.insert(&row("ZED", 1, "#general", 100)).unwrap();
        store.insert(&row("ABE", 1, "#general", 100)).unwrap();
        store.insert(&row("MID", 1, "#general", 50)).unwrap();

        let rows = store.export("#general").unwrap();
        let order: Vec<String> = rows.iter().map(|r| r.origin.to_string()).collect();
        assert_eq!(order, vec!["MID", "ABE", "ZED"]);
    }

    #[test]
    fn latest_rows_returns_newest_last_for_one_origin() {
        let store = MemoryStore::new();
        for seqno in 1..=5 {
            store.insert(&row("NOCALL-1", seqno, "#general", 100 * u64::from(seqno))).unwrap();
        }
        // A noisier origin on the same channel must not leak into the
        // answer.
        for seqno in 1..=5 {
            store.insert(&row("W1AW", seqno, "#general", 1000 + u64::from(seqno))).unwrap();
        }

        let origin = NodeId::from_callsign("NOCALL-1");
        let rows = store.latest_rows("#general", &origin, 2).unwrap();
        assert_eq!(rows.iter().map(|r| r.seqno).collect::<Vec<_>>(), vec![4, 5]);
        assert!(rows.iter().all(|r| r.origin == origin));
    }

    #[test]
    fn prune_removes_old_rows() {
        let store = MemoryStore::new();
        store.insert(&row("NOCALL-1", 1, "#general", 100)).unwrap();
        store.insert(&row("NOCALL-1", 2, "#general", 200)).unwrap();

        assert_eq!(store.prune_older_than(150).unwrap(), 1);
        assert_eq!(store.row_count(), 1);
        assert_eq!(store.prune_older_than(150).unwrap(), 0);
    }

    #[test]
    fn list_channels_is_sorted_and_deduped() {
        let store = MemoryStore::new();
        store.insert(&row("A", 1, "#zulu", 1)).unwrap();
        store.insert(&row("A", 2, "#alpha", 2)).unwrap();
        store.insert(&row("B", 1, "#zulu", 3)).unwrap();

        assert_eq!(store.list_channels().unwrap(), vec!["#alpha", "#zulu"]);
    }
}
