//! The relational metadata catalog (`manifest.db`).
//!
//! Tables mirror the on-disk format in `spec.md` §6: `timeline`,
//! `cleanup_policy`, `timeline_cleanup_policy`, `snapshot`, `version`,
//! `block`, and `chunk_reference`, with cascading foreign keys so that
//! deleting a timeline deletes its snapshots, versions, and chunk
//! references in one statement. `rusqlite` (bundled) plays the role here
//! that the datastore's on-disk index files play in the teacher: the
//! single source of truth for what exists, queried and mutated inside
//! transactions that bracket every multi-step write.

use std::path::Path;

use anyhow::{Context, Error};
use rusqlite::Connection;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS timeline (
    id          TEXT PRIMARY KEY,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cleanup_policy (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    min_interval INTEGER NOT NULL,
    time_frame   INTEGER NOT NULL,
    max_versions INTEGER NOT NULL,
    description  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS timeline_cleanup_policy (
    timeline_id TEXT NOT NULL REFERENCES timeline(id) ON DELETE CASCADE,
    policy_id   INTEGER NOT NULL REFERENCES cleanup_policy(id) ON DELETE CASCADE,
    PRIMARY KEY (timeline_id, policy_id)
);

CREATE TABLE IF NOT EXISTS snapshot (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timeline_id TEXT NOT NULL REFERENCES timeline(id) ON DELETE CASCADE,
    revision    INTEGER NOT NULL,
    created_at  INTEGER NOT NULL,
    name        TEXT,
    description TEXT NOT NULL DEFAULT '',
    pinned      INTEGER NOT NULL DEFAULT 0,
    UNIQUE (timeline_id, revision)
);

CREATE TABLE IF NOT EXISTS version (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id     INTEGER NOT NULL REFERENCES snapshot(id) ON DELETE CASCADE,
    path            TEXT NOT NULL,
    last_modified   INTEGER NOT NULL,
    size            INTEGER NOT NULL,
    permissions     INTEGER,
    content_checksum BLOB NOT NULL,
    UNIQUE (snapshot_id, path)
);

CREATE TABLE IF NOT EXISTS block (
    checksum BLOB PRIMARY KEY,
    length   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chunk_reference (
    version_id INTEGER NOT NULL REFERENCES version(id) ON DELETE CASCADE,
    ordinal    INTEGER NOT NULL,
    checksum   BLOB NOT NULL REFERENCES block(checksum),
    PRIMARY KEY (version_id, ordinal)
);

CREATE INDEX IF NOT EXISTS idx_version_path ON version(path);
CREATE INDEX IF NOT EXISTS idx_snapshot_timeline ON snapshot(timeline_id, revision);
CREATE INDEX IF NOT EXISTS idx_chunk_reference_checksum ON chunk_reference(checksum);
";

/// A handle to `manifest.db`.
///
/// Every mutation that touches more than one table runs inside an explicit
/// `rusqlite::Transaction` obtained via [`Database::transaction`] so that
/// the single-writer discipline described in `spec.md` §5 is enforced by
/// SQLite's own locking rather than an additional in-process mutex.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if absent) the database at `path`, applying the
    /// schema. Safe to call repeatedly; `CREATE TABLE IF NOT EXISTS` makes
    /// it idempotent.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path)
            .with_context(|| format!("unable to open manifest database at {path:?}"))?;
        conn.execute_batch(SCHEMA)
            .context("unable to apply manifest database schema")?;
        Ok(Database { conn })
    }

    /// Open an in-memory database, used by tests that don't need
    /// persistence across process restarts.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Database { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Run `f` inside a transaction, committing on `Ok` and rolling back on
    /// `Err` (the rollback happens automatically when the `Transaction`
    /// value is dropped without a `commit()`).
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let tx = self.conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_cleanly_and_is_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            tx.execute(
                "INSERT INTO timeline (id, created_at) VALUES (?1, ?2)",
                rusqlite::params!["fixed-id", 0i64],
            )?;
            Ok(())
        })
        .unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM timeline", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn deleting_timeline_cascades_to_snapshots_and_versions() {
        let mut db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            tx.execute(
                "INSERT INTO timeline (id, created_at) VALUES ('t1', 0)",
                [],
            )?;
            tx.execute(
                "INSERT INTO snapshot (timeline_id, revision, created_at) VALUES ('t1', 1, 0)",
                [],
            )?;
            tx.execute(
                "INSERT INTO version (snapshot_id, path, last_modified, size, content_checksum)
                 VALUES (last_insert_rowid(), 'a.txt', 0, 0, X'00')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        db.transaction(|tx| {
            tx.execute("DELETE FROM timeline WHERE id = 't1'", [])?;
            Ok(())
        })
        .unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
