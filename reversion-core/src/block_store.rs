//! Content-addressed, deduplicated byte storage keyed by SHA-256.
//!
//! Grounded on the teacher's `ChunkStore`: blocks live under a sharded
//! directory tree (`<first-two-hex>/<full-hex>`) and are written via a
//! staged write followed by an atomic rename, so a crash mid-write leaves
//! at worst a leftover temp file, never a half-written block. Unlike the
//! teacher, there is no on-disk encryption or compression format to peel
//! off — a block is exactly the bytes that hash to its name — and the
//! catalog lives in `manifest.db` rather than being implicit in directory
//! structure plus a GC atime sweep.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use rusqlite::{params, Connection};
use tempfile::NamedTempFile;

use reversion_api_types::{Checksum, ReversionError};

/// File-system view of the block store, rooted at `<repo>/blobs`.
pub struct BlockStore {
    blobs_dir: PathBuf,
}

fn shard_dir(blobs_dir: &Path, checksum: &Checksum) -> PathBuf {
    let hex = checksum.to_hex();
    blobs_dir.join(&hex[..2])
}

fn block_path(blobs_dir: &Path, checksum: &Checksum) -> PathBuf {
    shard_dir(blobs_dir, checksum).join(checksum.to_hex())
}

/// Free-function form of [`BlockStore::put`], taking the blobs directory by
/// reference instead of `&self`. Lets a caller stage block writes inside a
/// database transaction closure without holding a borrow of whatever owns
/// the `BlockStore` across the closure's `&mut` borrow of that owner — see
/// `timeline::create_snapshot`, which captures the directory as an owned
/// `PathBuf` before opening its transaction for exactly this reason.
pub(crate) fn put_block(blobs_dir: &Path, conn: &Connection, data: &[u8]) -> Result<Checksum, Error> {
    let checksum = Checksum::of(data);
    let dir = shard_dir(blobs_dir, &checksum);
    let path = block_path(blobs_dir, &checksum);

    if !path.is_file() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("unable to create block shard directory {dir:?}"))?;
        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("unable to create staging file in {dir:?}"))?;
        use std::io::Write;
        tmp.write_all(data)?;
        tmp.persist(&path)
            .with_context(|| format!("unable to finalize block at {path:?}"))?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO block (checksum, length) VALUES (?1, ?2)",
        params![checksum.as_bytes(), data.len() as i64],
    )
    .context("unable to insert block catalog row")?;

    Ok(checksum)
}

impl BlockStore {
    /// Create a fresh, empty block store at `blobs_dir`. Fails if the
    /// directory already exists.
    pub fn create(blobs_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let blobs_dir = blobs_dir.into();
        if blobs_dir.exists() {
            return Err(ReversionError::AlreadyExists(blobs_dir).into());
        }
        fs::create_dir_all(&blobs_dir)
            .with_context(|| format!("unable to create block store at {blobs_dir:?}"))?;
        Ok(BlockStore { blobs_dir })
    }

    /// Open an existing block store. Fails if `blobs_dir` is missing.
    pub fn open(blobs_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let blobs_dir = blobs_dir.into();
        if !blobs_dir.is_dir() {
            return Err(ReversionError::NoSuchFile(blobs_dir).into());
        }
        Ok(BlockStore { blobs_dir })
    }

    pub fn base(&self) -> &Path {
        &self.blobs_dir
    }

    /// Store `data`, returning its checksum. Idempotent: storing the same
    /// bytes twice is a no-op on the second call. The file is written
    /// before the catalog row so a crash between the two leaves only a
    /// harmless orphan file, cleaned up by [`BlockStore::sweep`].
    pub fn put(&self, conn: &Connection, data: &[u8]) -> Result<Checksum, Error> {
        put_block(&self.blobs_dir, conn, data)
    }

    /// Read a block's bytes back. Fails with [`ReversionError::MissingBlock`]
    /// if no file exists at the checksum's path.
    pub fn get(&self, checksum: &Checksum) -> Result<Vec<u8>, Error> {
        let path = block_path(&self.blobs_dir, checksum);
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ReversionError::MissingBlock(*checksum).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a block. The catalog row is deleted before the file, so a
    /// crash between the two leaves an orphan file rather than a dangling
    /// catalog row (the latter would be read back as present but unreadable).
    pub fn remove(&self, conn: &Connection, checksum: &Checksum) -> Result<(), Error> {
        conn.execute(
            "DELETE FROM block WHERE checksum = ?1",
            params![checksum.as_bytes()],
        )?;
        let path = block_path(&self.blobs_dir, checksum);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Enumerate every block file on disk by checksum, independent of the
    /// catalog.
    pub fn list(&self) -> Result<Vec<Checksum>, Error> {
        let mut out = Vec::new();
        for shard in fs::read_dir(&self.blobs_dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Ok(checksum) = name.parse::<Checksum>() {
                    out.push(checksum);
                }
            }
        }
        Ok(out)
    }

    /// Delete every on-disk block not referenced by any chunk reference.
    /// Returns the number of blocks removed.
    pub fn sweep(&self, conn: &Connection) -> Result<u64, Error> {
        let mut removed = 0;
        for checksum in self.list()? {
            let referenced: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chunk_reference WHERE checksum = ?1",
                params![checksum.as_bytes()],
                |row| row.get(0),
            )?;
            if referenced == 0 {
                let path = block_path(&self.blobs_dir, &checksum);
                if let Err(err) = fs::remove_file(&path) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        return Err(err.into());
                    }
                }
                conn.execute(
                    "DELETE FROM block WHERE checksum = ?1",
                    params![checksum.as_bytes()],
                )?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn put_is_idempotent_and_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::create(dir.path().join("blobs")).unwrap();
        let db = Database::open_in_memory().unwrap();

        let checksum1 = store.put(db.conn(), b"hello world").unwrap();
        let checksum2 = store.put(db.conn(), b"hello world").unwrap();
        assert_eq!(checksum1, checksum2);
        assert_eq!(store.get(&checksum1).unwrap(), b"hello world");
    }

    #[test]
    fn get_missing_block_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::create(dir.path().join("blobs")).unwrap();
        let bogus = Checksum::of(b"never stored");
        let err = store.get(&bogus).unwrap_err();
        assert!(err.downcast_ref::<ReversionError>().is_some());
    }

    #[test]
    fn sweep_removes_only_unreferenced_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::create(dir.path().join("blobs")).unwrap();
        let db = Database::open_in_memory().unwrap();

        let kept = store.put(db.conn(), b"kept").unwrap();
        let orphan = store.put(db.conn(), b"orphan").unwrap();

        db.conn()
            .execute(
                "INSERT INTO timeline (id, created_at) VALUES ('t', 0)",
                [],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO snapshot (timeline_id, revision, created_at) VALUES ('t', 1, 0)",
                [],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO version (snapshot_id, path, last_modified, size, content_checksum)
                 VALUES (1, 'a', 0, 4, X'00')",
                [],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO chunk_reference (version_id, ordinal, checksum) VALUES (1, 0, ?1)",
                params![kept.as_bytes()],
            )
            .unwrap();

        let removed = store.sweep(db.conn()).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&kept).is_ok());
        assert!(store.get(&orphan).is_err());
    }

    #[test]
    fn remove_deletes_row_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::create(dir.path().join("blobs")).unwrap();
        let db = Database::open_in_memory().unwrap();
        let checksum = store.put(db.conn(), b"gone soon").unwrap();
        store.remove(db.conn(), &checksum).unwrap();
        assert!(store.get(&checksum).is_err());
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM block", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
