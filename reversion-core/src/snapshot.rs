//! A point-in-time set of versions within a timeline.

use std::collections::HashMap;

use anyhow::Error;
use rusqlite::{params, Row};
use uuid::Uuid;

use reversion_api_types::Checksum;

use crate::repository::Repository;
use crate::version::VersionMeta;

/// A snapshot's recorded metadata, as stored in the `snapshot` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub id: i64,
    pub timeline_id: Uuid,
    pub revision: i64,
    pub created_at: i64,
    pub name: Option<String>,
    pub description: String,
    pub pinned: bool,
}

pub(crate) fn snapshot_from_row(row: &Row) -> rusqlite::Result<SnapshotMeta> {
    let timeline_id: String = row.get(1)?;
    Ok(SnapshotMeta {
        id: row.get(0)?,
        timeline_id: timeline_id.parse().unwrap_or_else(|_| Uuid::nil()),
        revision: row.get(2)?,
        created_at: row.get(3)?,
        name: row.get(4)?,
        description: row.get(5)?,
        pinned: row.get::<_, i64>(6)? != 0,
    })
}

pub(crate) fn version_from_row(row: &Row) -> rusqlite::Result<VersionMeta> {
    let raw: Vec<u8> = row.get(6)?;
    let mut digest = [0u8; reversion_api_types::CHECKSUM_SIZE];
    digest.copy_from_slice(&raw);
    Ok(VersionMeta {
        id: row.get(0)?,
        snapshot_id: row.get(1)?,
        path: row.get(2)?,
        last_modified: row.get(3)?,
        size: row.get(4)?,
        permissions: row.get(5)?,
        content_checksum: Checksum::new(digest),
    })
}

/// Look up a snapshot by its revision within a timeline.
pub fn by_revision(repo: &Repository, timeline_id: Uuid, revision: i64) -> Result<Option<SnapshotMeta>, Error> {
    repo.db()
        .conn()
        .query_row(
            "SELECT id, timeline_id, revision, created_at, name, description, pinned
             FROM snapshot WHERE timeline_id = ?1 AND revision = ?2",
            params![timeline_id.to_string(), revision],
            snapshot_from_row,
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
}

/// A snapshot's versions, keyed by path.
pub fn versions(repo: &Repository, snapshot_id: i64) -> Result<HashMap<String, VersionMeta>, Error> {
    let mut stmt = repo.db().conn().prepare(
        "SELECT id, snapshot_id, path, last_modified, size, permissions, content_checksum
         FROM version WHERE snapshot_id = ?1",
    )?;
    let rows = stmt.query_map(params![snapshot_id], version_from_row)?;
    let mut map = HashMap::new();
    for row in rows {
        let version = row?;
        map.insert(version.path.clone(), version);
    }
    Ok(map)
}

/// For every path ever present in the timeline at or before `revision`,
/// the newest version at-or-before that revision. Used to present a
/// working tree "as of" a point in time.
pub fn cumulative_versions(repo: &Repository, timeline_id: Uuid, revision: i64) -> Result<HashMap<String, VersionMeta>, Error> {
    let mut stmt = repo.db().conn().prepare(
        "SELECT v.id, v.snapshot_id, v.path, v.last_modified, v.size, v.permissions, v.content_checksum
         FROM version v
         JOIN snapshot s ON s.id = v.snapshot_id
         WHERE s.timeline_id = ?1 AND s.revision <= ?2
         ORDER BY v.path ASC, s.revision DESC",
    )?;
    let rows = stmt.query_map(params![timeline_id.to_string(), revision], version_from_row)?;

    let mut map = HashMap::new();
    for row in rows {
        let version = row?;
        // Rows arrive ordered newest-revision-first per path; keep only the
        // first (newest) one seen for each path.
        map.entry(version.path.clone()).or_insert(version);
    }
    Ok(map)
}

/// Delete a single version from a snapshot. Returns `false` if no version
/// at that path existed in the snapshot.
pub fn remove_version(repo: &mut Repository, snapshot_id: i64, path: &str) -> Result<bool, Error> {
    let changed = repo.db_mut().transaction(|tx| {
        let n = tx.execute(
            "DELETE FROM version WHERE snapshot_id = ?1 AND path = ?2",
            params![snapshot_id, path],
        )?;
        Ok(n)
    })?;
    Ok(changed > 0)
}

/// If a snapshot has no versions left, delete it. Returns `true` if the
/// snapshot was deleted.
pub fn delete_if_empty(repo: &mut Repository, snapshot_id: i64) -> Result<bool, Error> {
    repo.db_mut().transaction(|tx| {
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM version WHERE snapshot_id = ?1",
            params![snapshot_id],
            |row| row.get(0),
        )?;
        if count == 0 {
            tx.execute("DELETE FROM snapshot WHERE id = ?1", params![snapshot_id])?;
            Ok(true)
        } else {
            Ok(false)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline;
    use reversion_api_types::RepositoryConfig;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn cumulative_versions_picks_newest_at_or_before_revision() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::create(dir.path().join("repo"), RepositoryConfig::default()).unwrap();
        let timeline_id = timeline::create_timeline(&mut repo).unwrap();

        fs::write(dir.path().join("a.txt"), b"rev1").unwrap();
        fs::write(dir.path().join("b.txt"), b"only-at-rev1").unwrap();
        timeline::create_snapshot(
            &mut repo, timeline_id, dir.path(),
            &[PathBuf::from("a.txt"), PathBuf::from("b.txt")],
            None, "", false,
        ).unwrap();

        fs::write(dir.path().join("a.txt"), b"rev2").unwrap();
        let r2 = timeline::create_snapshot(
            &mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false,
        ).unwrap();

        let as_of_r2 = cumulative_versions(&repo, timeline_id, r2).unwrap();
        assert_eq!(as_of_r2["a.txt"].content_checksum, reversion_api_types::Checksum::of(b"rev2"));
        assert_eq!(as_of_r2["b.txt"].content_checksum, reversion_api_types::Checksum::of(b"only-at-rev1"));
    }

    #[test]
    fn delete_if_empty_removes_only_when_no_versions_remain() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::create(dir.path().join("repo"), RepositoryConfig::default()).unwrap();
        let timeline_id = timeline::create_timeline(&mut repo).unwrap();
        fs::write(dir.path().join("a.txt"), b"data").unwrap();
        let revision = timeline::create_snapshot(&mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false).unwrap();
        let meta = by_revision(&repo, timeline_id, revision).unwrap().unwrap();

        assert!(!delete_if_empty(&mut repo, meta.id).unwrap());
        assert!(remove_version(&mut repo, meta.id, "a.txt").unwrap());
        assert!(delete_if_empty(&mut repo, meta.id).unwrap());
    }
}
