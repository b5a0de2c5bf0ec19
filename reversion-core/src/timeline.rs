//! Timelines: a repository's named histories of snapshots.
//!
//! A timeline is little more than a 128-bit id plus the set of cleanup
//! policies attached to it; almost everything interesting happens at the
//! snapshot and version level, reached here through
//! [`create_snapshot`]/[`remove_snapshot`]/[`list_versions`]/[`paths`].

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Error};
use fs2::FileExt;
use rusqlite::params;
use uuid::Uuid;

use reversion_api_types::{CleanupPolicy, Checksum, ReversionError};

use crate::chunker::Chunker;
use crate::cleanup;
use crate::repository::Repository;
use crate::snapshot::{self, SnapshotMeta};
use crate::version::VersionMeta;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(unix)]
fn file_permissions(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn file_permissions(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

/// Create a new, empty timeline (no cleanup policies attached).
pub fn create_timeline(repo: &mut Repository) -> Result<Uuid, Error> {
    let id = Uuid::new_v4();
    let created_at = now_millis();
    repo.db_mut().transaction(|tx| {
        tx.execute(
            "INSERT INTO timeline (id, created_at) VALUES (?1, ?2)",
            params![id.to_string(), created_at],
        )?;
        Ok(())
    })?;
    Ok(id)
}

/// Delete a timeline, cascading to its snapshots, versions, and chunk
/// references. Orphaned blocks are left for the next [`Repository::sweep`].
/// Returns `false` if no timeline with that id existed.
pub fn remove_timeline(repo: &mut Repository, id: Uuid) -> Result<bool, Error> {
    let changed = repo.db_mut().transaction(|tx| {
        let n = tx.execute(
            "DELETE FROM timeline WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(n)
    })?;
    Ok(changed > 0)
}

/// Attach a cleanup policy to a timeline.
pub fn add_cleanup_policy(
    repo: &mut Repository,
    timeline_id: Uuid,
    policy: &CleanupPolicy,
) -> Result<(), Error> {
    repo.db_mut().transaction(|tx| {
        tx.execute(
            "INSERT INTO cleanup_policy (min_interval, time_frame, max_versions, description)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                policy.min_interval.as_millis() as i64,
                policy.time_frame.as_millis() as i64,
                policy.max_versions,
                policy.description,
            ],
        )?;
        let policy_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO timeline_cleanup_policy (timeline_id, policy_id) VALUES (?1, ?2)",
            params![timeline_id.to_string(), policy_id],
        )?;
        Ok(())
    })
}

/// The cleanup policies currently attached to a timeline.
pub fn cleanup_policies(repo: &Repository, timeline_id: Uuid) -> Result<Vec<CleanupPolicy>, Error> {
    use std::time::Duration;

    let mut stmt = repo.db().conn().prepare(
        "SELECT cp.min_interval, cp.time_frame, cp.max_versions, cp.description
         FROM cleanup_policy cp
         JOIN timeline_cleanup_policy tcp ON tcp.policy_id = cp.id
         WHERE tcp.timeline_id = ?1",
    )?;
    let rows = stmt.query_map(params![timeline_id.to_string()], |row| {
        let min_interval: i64 = row.get(0)?;
        let time_frame: i64 = row.get(1)?;
        let max_versions: u32 = row.get(2)?;
        let description: String = row.get(3)?;
        Ok(CleanupPolicy::new(
            Duration::from_millis(min_interval.max(0) as u64),
            Duration::from_millis(time_frame.max(0) as u64),
            max_versions,
            description,
        ))
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
}

/// Create a new snapshot of `paths` (relative to `work_root`), allocating
/// the next revision in `timeline_id`. Implements `spec.md` §4.4's five-step
/// `createSnapshot` algorithm inside a single database transaction.
pub fn create_snapshot(
    repo: &mut Repository,
    timeline_id: Uuid,
    work_root: &Path,
    paths: &[PathBuf],
    name: Option<String>,
    description: &str,
    pinned: bool,
) -> Result<i64, Error> {
    let chunker: Chunker = repo.config().chunking_mode().into();

    // Read and chunk every path up front (outside the transaction): disk
    // I/O should not hold the database write lock any longer than it has to.
    struct Staged {
        relative: String,
        last_modified: i64,
        size: i64,
        permissions: Option<u32>,
        content_checksum: Checksum,
        chunks: Vec<Vec<u8>>,
    }

    let mut staged = Vec::with_capacity(paths.len());
    for relative in paths {
        let absolute = work_root.join(relative);
        let file = File::open(&absolute)
            .map_err(|_| ReversionError::NoSuchFile(absolute.clone()))?;
        file.lock_shared()
            .with_context(|| format!("unable to lock {absolute:?} for reading"))?;

        let metadata = file.metadata()?;
        let mut whole = Vec::new();
        (&file).read_to_end(&mut whole)?;
        file.unlock().ok();

        let content_checksum = Checksum::of(&whole);
        let chunks = chunker.chunk(&whole[..])?;

        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        staged.push(Staged {
            relative: relative.to_string_lossy().replace('\\', "/"),
            last_modified,
            size: metadata.len() as i64,
            permissions: file_permissions(&metadata),
            content_checksum,
            chunks,
        });
    }

    // Captured by value, not `repo.blocks()`: the transaction closure below
    // needs `&mut repo` (via `db_mut`), so it cannot also hold a `&BlockStore`
    // borrowed from `&repo`.
    let blobs_dir = repo.blocks().base().to_path_buf();
    let created_at = now_millis();

    let revision = repo.db_mut().transaction(|tx| {
        let next_revision: i64 = tx.query_row(
            "SELECT COALESCE(MAX(revision), 0) + 1 FROM snapshot WHERE timeline_id = ?1",
            params![timeline_id.to_string()],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO snapshot (timeline_id, revision, created_at, name, description, pinned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                timeline_id.to_string(),
                next_revision,
                created_at,
                name,
                description,
                pinned as i64,
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        for entry in &staged {
            tx.execute(
                "INSERT INTO version
                   (snapshot_id, path, last_modified, size, permissions, content_checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot_id,
                    entry.relative,
                    entry.last_modified,
                    entry.size,
                    entry.permissions,
                    entry.content_checksum.as_bytes(),
                ],
            )?;
            let version_id = tx.last_insert_rowid();

            for (ordinal, chunk) in entry.chunks.iter().enumerate() {
                let checksum = crate::block_store::put_block(&blobs_dir, tx, chunk)?;
                tx.execute(
                    "INSERT INTO chunk_reference (version_id, ordinal, checksum)
                     VALUES (?1, ?2, ?3)",
                    params![version_id, ordinal as i64, checksum.as_bytes()],
                )?;
            }
        }

        Ok(next_revision)
    })?;

    Ok(revision)
}

/// Delete a snapshot and everything it owns. Returns `false` if no
/// snapshot with that revision existed on the timeline.
pub fn remove_snapshot(repo: &mut Repository, timeline_id: Uuid, revision: i64) -> Result<bool, Error> {
    let changed = repo.db_mut().transaction(|tx| {
        let n = tx.execute(
            "DELETE FROM snapshot WHERE timeline_id = ?1 AND revision = ?2",
            params![timeline_id.to_string(), revision],
        )?;
        Ok(n)
    })?;
    Ok(changed > 0)
}

/// Every version ever recorded of `path` in this timeline, newest revision
/// first.
pub fn list_versions(repo: &Repository, timeline_id: Uuid, path: &str) -> Result<Vec<VersionMeta>, Error> {
    let mut stmt = repo.db().conn().prepare(
        "SELECT v.id, v.snapshot_id, v.path, v.last_modified, v.size, v.permissions, v.content_checksum
         FROM version v
         JOIN snapshot s ON s.id = v.snapshot_id
         WHERE s.timeline_id = ?1 AND v.path = ?2
         ORDER BY s.revision DESC",
    )?;
    let rows = stmt.query_map(params![timeline_id.to_string(), path], snapshot::version_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
}

/// The union of every path ever versioned in this timeline.
pub fn paths(repo: &Repository, timeline_id: Uuid) -> Result<Vec<String>, Error> {
    let mut stmt = repo.db().conn().prepare(
        "SELECT DISTINCT v.path
         FROM version v
         JOIN snapshot s ON s.id = v.snapshot_id
         WHERE s.timeline_id = ?1
         ORDER BY v.path",
    )?;
    let rows = stmt.query_map(params![timeline_id.to_string()], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
}

/// Apply retention policies, defaulting to every path in the timeline when
/// `paths_to_clean` is `None`. See `cleanup` for the windowed algorithm.
pub fn clean(repo: &mut Repository, timeline_id: Uuid, paths_to_clean: Option<&[String]>) -> Result<(), Error> {
    cleanup::clean(repo, timeline_id, paths_to_clean)
}

/// Every snapshot recorded in a timeline, oldest revision first.
pub fn snapshots(repo: &Repository, timeline_id: Uuid) -> Result<Vec<SnapshotMeta>, Error> {
    let mut stmt = repo.db().conn().prepare(
        "SELECT id, timeline_id, revision, created_at, name, description, pinned
         FROM snapshot WHERE timeline_id = ?1 ORDER BY revision ASC",
    )?;
    let rows = stmt.query_map(params![timeline_id.to_string()], snapshot::snapshot_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reversion_api_types::RepositoryConfig;
    use std::time::Duration;

    fn open_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::create(dir.path().join("repo"), RepositoryConfig::default()).unwrap();
        (dir, repo)
    }

    #[test]
    fn revisions_increase_strictly() {
        let (dir, mut repo) = open_repo();
        let timeline_id = create_timeline(&mut repo).unwrap();

        fs::write(dir.path().join("a.txt"), b"one").unwrap();
        let r1 = create_snapshot(&mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false).unwrap();

        fs::write(dir.path().join("a.txt"), b"two").unwrap();
        let r2 = create_snapshot(&mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false).unwrap();

        assert_eq!(r1, 1);
        assert_eq!(r2, 2);
    }

    #[test]
    fn missing_path_fails_with_no_such_file() {
        let (dir, mut repo) = open_repo();
        let timeline_id = create_timeline(&mut repo).unwrap();
        let err = create_snapshot(
            &mut repo,
            timeline_id,
            dir.path(),
            &[PathBuf::from("missing.txt")],
            None,
            "",
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReversionError>(),
            Some(ReversionError::NoSuchFile(_))
        ));
    }

    #[test]
    fn list_versions_is_newest_first() {
        let (dir, mut repo) = open_repo();
        let timeline_id = create_timeline(&mut repo).unwrap();
        fs::write(dir.path().join("a.txt"), b"v1").unwrap();
        create_snapshot(&mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false).unwrap();
        fs::write(dir.path().join("a.txt"), b"v2").unwrap();
        create_snapshot(&mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false).unwrap();

        let versions = list_versions(&repo, timeline_id, "a.txt").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].content_checksum, Checksum::of(b"v2"));
        assert_eq!(versions[1].content_checksum, Checksum::of(b"v1"));
    }

    #[test]
    fn cleanup_policies_roundtrip_through_storage() {
        let (_dir, mut repo) = open_repo();
        let timeline_id = create_timeline(&mut repo).unwrap();
        let policy = CleanupPolicy::of_versions(3);
        add_cleanup_policy(&mut repo, timeline_id, &policy).unwrap();
        let stored = cleanup_policies(&repo, timeline_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], policy);
        assert_eq!(stored[0].min_interval, Duration::from_millis(i64::MAX as u64));
    }
}
