//! Durable checkpoints.
//!
//! Snapshots are stored in a SQLite table keyed by engine mode and an
//! increasing checkpoint number. Writing a checkpoint garbage collects
//! every older one for the same mode in the same transaction, so the
//! table holds at most one row per mode once a write commits.

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::config::Mode;
use crate::errors::Result;
use crate::snapshot::StateBytes;

fn get_migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE checkpoints ( \
         created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP, \
         mode TEXT NOT NULL, \
         seq INTEGER NOT NULL CHECK (seq > 0), \
         snapshot BLOB NOT NULL, \
         PRIMARY KEY (mode, seq) \
         ) STRICT",
    )])
}

#[test]
fn migrations_valid() -> rusqlite_migration::Result<()> {
    get_migrations().validate()
}

/// Setup our connection-level pragmas. Run this on each connection.
fn setup_conn(conn: &mut Connection) -> Result<()> {
    // These are recommended by Litestream.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", "5000")?;
    get_migrations().to_latest(conn)?;
    Ok(())
}

pub struct CheckpointStore {
    conn: Connection,
}

impl CheckpointStore {
    /// Open or create the checkpoint DB at `file`.
    pub fn open(file: &Path) -> Result<Self> {
        tracing::info!("Opening checkpoint DB at {file:?}");
        let mut conn = Connection::open_with_flags(
            file,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        setup_conn(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        setup_conn(&mut conn)?;
        Ok(Self { conn })
    }

    /// Store a new checkpoint for `mode` and drop the older ones.
    ///
    /// Returns the new checkpoint number.
    pub fn write(&mut self, mode: Mode, snapshot: &StateBytes) -> Result<i64> {
        let txn = self.conn.transaction()?;
        let seq: i64 = txn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM checkpoints WHERE mode = ?1",
            (mode.label(),),
            |row| row.get(0),
        )?;
        txn.execute(
            "INSERT INTO checkpoints (mode, seq, snapshot) VALUES (?1, ?2, ?3)",
            (mode.label(), seq, &snapshot.0),
        )?;
        let collected = txn.execute(
            "DELETE FROM checkpoints WHERE mode = ?1 AND seq < ?2",
            (mode.label(), seq),
        )?;
        txn.commit()?;
        tracing::debug!(mode = mode.label(), seq, collected, "wrote checkpoint");
        Ok(seq)
    }

    /// Newest checkpoint for `mode`, if any.
    pub fn latest(&self, mode: Mode) -> Result<Option<StateBytes>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT snapshot FROM checkpoints WHERE mode = ?1 ORDER BY seq DESC LIMIT 1",
                (mode.label(),),
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(snapshot.map(StateBytes))
    }

    #[cfg(test)]
    fn count(&self, mode: Mode) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE mode = ?1",
            (mode.label(),),
            |row| row.get(0),
        )?)
    }
}
