//! SQLite-backed chat store.
//!
//! One database file, WAL journaling, a busy timeout for the brief-retry
//! discipline, and a schema-version row driving additive migrations. The
//! `(origin, seqno)` primary key makes `INSERT OR IGNORE` the idempotent
//! insert; `changes()` distinguishes `Inserted` from `Duplicate`.
//!
//! Single-writer/multi-reader: all access serializes through one
//! connection behind a mutex, the same discipline the rest of the stack
//! assumes for store calls.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use rusqlite::{Connection, OptionalExtension, params};
use skywave_core::{
    StoreError,
    store::{ChatRow, ChatStore, InsertOutcome},
};
use skywave_proto::NodeId;

/// Current schema version.
const SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        origin BLOB NOT NULL,
        seqno INTEGER NOT NULL,
        channel TEXT NOT NULL,
        nick TEXT NOT NULL,
        body TEXT NOT NULL,
        created_ts INTEGER NOT NULL,
        local_insert_ts INTEGER NOT NULL,
        PRIMARY KEY (origin, seqno)
    );

    CREATE INDEX IF NOT EXISTS idx_messages_channel
        ON messages(channel, created_ts);
";

/// SQLite chat store.
///
/// Clones share the connection; the store is cheap to hand to the chat
/// client and the sync responder alike.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] if the file cannot be opened
    /// - [`StoreError::Corrupt`] if the schema version is newer than this
    ///   build understands
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(io_err)?;
        Self::configure(conn, busy_timeout)
    }

    /// In-memory database, for tests.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] on sqlite failure
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(io_err)?;
        Self::configure(conn, Duration::from_millis(100))
    }

    fn configure(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout).map_err(io_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(io_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(io_err)?;

        migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Stored schema version, for diagnostics.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] on sqlite failure
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.lock();
        read_version(&conn)
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, Connection> {
        // Poisoning requires a panic while holding the lock; store methods
        // do not panic.
        self.conn.lock().expect("sqlite connection mutex poisoned")
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(io_err)?;

    let version = read_version(conn)?;
    match version {
        0 => {
            conn.execute_batch(CREATE_SCHEMA_V1).map_err(io_err)?;
            conn.execute("DELETE FROM schema_version", []).map_err(io_err)?;
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![
                SCHEMA_VERSION
            ])
            .map_err(io_err)?;
            Ok(())
        },
        SCHEMA_VERSION => Ok(()),
        newer => Err(StoreError::Corrupt(format!(
            "database schema version {newer} is newer than this build supports"
        ))),
    }
}

fn read_version(conn: &Connection) -> Result<i64, StoreError> {
    conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(io_err)
        .map(|v| v.unwrap_or(0))
}

fn io_err(error: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &error {
        if matches!(
            inner.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return StoreError::Busy;
        }
    }
    StoreError::Io(error.to_string())
}

fn origin_bytes(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<NodeId> {
    let blob: Vec<u8> = row.get(index)?;
    let bytes: [u8; 8] = blob.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Blob,
            "origin must be 8 bytes".into(),
        )
    })?;
    Ok(NodeId::from_bytes(bytes))
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        origin: origin_bytes(row, 0)?,
        seqno: row.get::<_, i64>(1)? as u32,
        channel: row.get(2)?,
        nick: row.get(3)?,
        text: row.get(4)?,
        created_ts: row.get::<_, i64>(5)? as u64,
        local_insert_ts: row.get::<_, i64>(6)? as u64,
    })
}

const ROW_COLUMNS: &str = "origin, seqno, channel, nick, body, created_ts, local_insert_ts";

impl ChatStore for SqliteStore {
    fn insert(&self, row: &ChatRow) -> Result<InsertOutcome, StoreError> {
        let conn = self.lock();
        let changed = conn
            .prepare_cached(
                "INSERT OR IGNORE INTO messages \
                 (origin, seqno, channel, nick, body, created_ts, local_insert_ts) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(io_err)?
            .execute(params![
                row.origin.as_bytes().as_slice(),
                i64::from(row.seqno),
                row.channel,
                row.nick,
                row.text,
                row.created_ts as i64,
                row.local_insert_ts as i64,
            ])
            .map_err(io_err)?;

        Ok(if changed == 1 { InsertOutcome::Inserted } else { InsertOutcome::Duplicate })
    }

    fn get_range(
        &self,
        channel: &str,
        origin: &NodeId,
        start: u32,
        end: u32,
    ) -> Result<Vec<ChatRow>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {ROW_COLUMNS} FROM messages \
                 WHERE channel = ?1 AND origin = ?2 AND seqno BETWEEN ?3 AND ?4 \
                 ORDER BY seqno ASC"
            ))
            .map_err(io_err)?;
        let rows = stmt
            .query_map(
                params![
                    channel,
                    origin.as_bytes().as_slice(),
                    i64::from(start),
                    i64::from(end)
                ],
                row_from_sql,
            )
            .map_err(io_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        Ok(rows)
    }

    fn max_seqno(&self, channel: &str, origin: &NodeId) -> Result<Option<u32>, StoreError> {
        let conn = self.lock();
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(seqno) FROM messages WHERE channel = ?1 AND origin = ?2",
                params![channel, origin.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .map_err(io_err)?;
        Ok(max.map(|v| v as u32))
    }

    fn last_seqno(&self, origin: &NodeId) -> Result<Option<u32>, StoreError> {
        let conn = self.lock();
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(seqno) FROM messages WHERE origin = ?1",
                params![origin.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .map_err(io_err)?;
        Ok(max.map(|v| v as u32))
    }

    fn latest_rows(
        &self,
        channel: &str,
        origin: &NodeId,
        limit: usize,
    ) -> Result<Vec<ChatRow>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {ROW_COLUMNS} FROM messages WHERE channel = ?1 AND origin = ?2 \
                 ORDER BY created_ts DESC, seqno DESC LIMIT ?3"
            ))
            .map_err(io_err)?;
        let mut rows = stmt
            .query_map(
                params![channel, origin.as_bytes().as_slice(), limit as i64],
                row_from_sql,
            )
            .map_err(io_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        rows.reverse();
        Ok(rows)
    }

    fn list_channels(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached("SELECT DISTINCT channel FROM messages ORDER BY channel")
            .map_err(io_err)?;
        let channels = stmt
            .query_map([], |row| row.get(0))
            .map_err(io_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        Ok(channels)
    }

    fn export(&self, channel: &str) -> Result<Vec<ChatRow>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {ROW_COLUMNS} FROM messages WHERE channel = ?1 \
                 ORDER BY created_ts ASC, origin ASC, seqno ASC"
            ))
            .map_err(io_err)?;
        let rows = stmt
            .query_map(params![channel], row_from_sql)
            .map_err(io_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        Ok(rows)
    }

    fn prune_older_than(&self, cutoff_ts: u64) -> Result<u64, StoreError> {
        let conn = self.lock();
        let removed = conn
            .execute("DELETE FROM messages WHERE created_ts < ?1", params![cutoff_ts as i64])
            .map_err(io_err)?;
        Ok(removed as u64)
    }
}
