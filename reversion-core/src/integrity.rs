//! Scanning the block store for damage and repairing it by rechunking
//! current working-directory files.
//!
//! Implements the two-phase cooperative protocol from
//! `reversion_api_types::repair`: [`BlobRepairAction::verify`] only reads,
//! and returns a [`BlobFollowupAction`] describing what it found; nothing
//! is mutated until the collaborator calls `repair()` on that follow-up.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Error;
use rusqlite::{params, Connection};

use reversion_api_types::{Checksum, FollowupAction, RepairAction, RepairResult};

use crate::chunker::Chunker;
use crate::repository::Repository;
use crate::snapshot;

/// A block the catalog expects to exist but which is missing, truncated,
/// or whose bytes hash to something other than its filename.
#[derive(Debug, Clone)]
pub struct CorruptBlock {
    pub checksum: Checksum,
    pub reason: String,
}

/// A version referencing a corrupt block, as found at `verify()` time.
#[derive(Debug, Clone)]
struct AffectedVersion {
    snapshot_id: i64,
    path: String,
}

/// Scans every catalogued block for corruption. Takes the work directory
/// root so a confirmed repair can rechunk the files that live there; the
/// block store itself has no notion of a working tree.
pub struct BlobRepairAction<'repo> {
    repo: &'repo Repository,
    work_root: PathBuf,
}

impl<'repo> BlobRepairAction<'repo> {
    pub fn new(repo: &'repo Repository, work_root: impl Into<PathBuf>) -> Self {
        BlobRepairAction {
            repo,
            work_root: work_root.into(),
        }
    }
}

impl fmt::Debug for BlobRepairAction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobRepairAction").finish()
    }
}

impl RepairAction for BlobRepairAction<'_> {
    fn message(&self) -> &str {
        "scan the block store for corrupt or missing blocks"
    }

    fn verify(&self) -> Result<Option<Box<dyn FollowupAction>>, Error> {
        let mut stmt = self.repo.db().conn().prepare("SELECT checksum, length FROM block")?;
        let rows = stmt.query_map([], |row| {
            let raw: Vec<u8> = row.get(0)?;
            let length: i64 = row.get(1)?;
            Ok((raw, length))
        })?;

        let mut corrupt = Vec::new();
        for row in rows {
            let (raw, expected_length) = row?;
            let mut digest = [0u8; reversion_api_types::CHECKSUM_SIZE];
            digest.copy_from_slice(&raw);
            let checksum = Checksum::new(digest);

            match self.repo.blocks().get(&checksum) {
                Err(_) => corrupt.push(CorruptBlock {
                    checksum,
                    reason: "missing from disk".to_owned(),
                }),
                Ok(bytes) => {
                    if bytes.len() as i64 != expected_length {
                        corrupt.push(CorruptBlock {
                            checksum,
                            reason: format!(
                                "size mismatch: catalog says {expected_length}, disk has {}",
                                bytes.len()
                            ),
                        });
                    } else if Checksum::of(&bytes) != checksum {
                        corrupt.push(CorruptBlock {
                            checksum,
                            reason: "checksum does not match stored bytes".to_owned(),
                        });
                    }
                }
            }
        }

        if corrupt.is_empty() {
            return Ok(None);
        }

        // Snapshot which versions reference each corrupt block now, while
        // still holding a borrow of the repository; `repair()` runs later
        // against a fresh connection and has no access to `self.repo`.
        let mut affected = HashMap::new();
        for block in &corrupt {
            affected.insert(block.checksum, versions_referencing(self.repo, &block.checksum)?);
        }

        Ok(Some(Box::new(BlobFollowupAction {
            work_root: self.work_root.clone(),
            database_path: self.repo.root().join("manifest.db"),
            blobs_dir: self.repo.blocks().base().to_owned(),
            chunker: self.repo.config().chunking_mode().into(),
            corrupt,
            affected,
        })))
    }
}

fn versions_referencing(repo: &Repository, checksum: &Checksum) -> Result<Vec<AffectedVersion>, Error> {
    let mut stmt = repo.db().conn().prepare(
        "SELECT DISTINCT v.snapshot_id, v.path FROM version v
         JOIN chunk_reference cr ON cr.version_id = v.id
         WHERE cr.checksum = ?1",
    )?;
    let rows = stmt.query_map(params![checksum.as_bytes()], |row| {
        Ok(AffectedVersion {
            snapshot_id: row.get(0)?,
            path: row.get(1)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
}

/// The confirmed repair: a list of corrupt blocks and the versions that
/// reference each, ready to act on.
pub struct BlobFollowupAction {
    work_root: PathBuf,
    database_path: PathBuf,
    blobs_dir: PathBuf,
    chunker: Chunker,
    corrupt: Vec<CorruptBlock>,
    affected: HashMap<Checksum, Vec<AffectedVersion>>,
}

impl fmt::Debug for BlobFollowupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobFollowupAction")
            .field("corrupt_count", &self.corrupt.len())
            .finish()
    }
}

impl FollowupAction for BlobFollowupAction {
    fn message(&self) -> &str {
        "rechunk affected working-directory files to restore corrupt blocks, or delete \
         unrepairable versions"
    }

    /// For each corrupt block, try every path that references it: rechunk
    /// the file as it currently stands on disk, looking for a chunk whose
    /// checksum matches. If found, write those bytes back to the block's
    /// storage location. If nothing can supply the bytes, every version
    /// referencing the block is unrepairable and is removed, each
    /// cascading to an empty-snapshot deletion.
    fn repair(&self) -> Result<RepairResult, Error> {
        let conn = Connection::open(&self.database_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let mut repaired = 0u32;
        let mut deleted_versions = 0u32;
        let mut touched_snapshots = Vec::new();

        for block in &self.corrupt {
            let affected = self.affected.get(&block.checksum).cloned().unwrap_or_default();

            let mut fixed = false;
            for version in &affected {
                let absolute = self.work_root.join(&version.path);
                let Ok(data) = fs::read(&absolute) else { continue };
                let chunks = match self.chunker.chunk(&data[..]) {
                    Ok(chunks) => chunks,
                    Err(_) => continue,
                };
                if let Some(bytes) = chunks.iter().find(|c| Checksum::of(c) == block.checksum) {
                    stage_block(&self.blobs_dir, &block.checksum, bytes)?;
                    fixed = true;
                    repaired += 1;
                    break;
                }
            }

            if !fixed {
                for version in &affected {
                    conn.execute(
                        "DELETE FROM version WHERE snapshot_id = ?1 AND path = ?2",
                        params![version.snapshot_id, version.path],
                    )?;
                    touched_snapshots.push(version.snapshot_id);
                    deleted_versions += 1;
                }
            }
        }

        for snapshot_id in touched_snapshots {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM version WHERE snapshot_id = ?1",
                params![snapshot_id],
                |row| row.get(0),
            )?;
            if count == 0 {
                conn.execute("DELETE FROM snapshot WHERE id = ?1", params![snapshot_id])?;
            }
        }

        Ok(RepairResult {
            success: true,
            message: format!(
                "repaired {repaired} block(s), deleted {deleted_versions} unrepairable version(s)"
            ),
        })
    }
}

fn stage_block(blobs_dir: &Path, checksum: &Checksum, bytes: &[u8]) -> Result<(), Error> {
    use std::io::Write;
    let hex = checksum.to_hex();
    let dir = blobs_dir.join(&hex[..2]);
    fs::create_dir_all(&dir)?;
    let path = dir.join(&hex);
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(&path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline;
    use reversion_api_types::RepositoryConfig;
    use std::path::PathBuf;

    #[test]
    fn verify_finds_nothing_on_a_healthy_repository() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::create(dir.path().join("repo"), RepositoryConfig::default()).unwrap();
        let timeline_id = timeline::create_timeline(&mut repo).unwrap();
        fs::write(dir.path().join("a.txt"), b"healthy contents").unwrap();
        timeline::create_snapshot(&mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false).unwrap();

        let action = BlobRepairAction::new(&repo, dir.path());
        assert!(action.verify().unwrap().is_none());
    }

    #[test]
    fn verify_detects_a_block_overwritten_with_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::create(dir.path().join("repo"), RepositoryConfig::default()).unwrap();
        let timeline_id = timeline::create_timeline(&mut repo).unwrap();
        fs::write(dir.path().join("a.txt"), b"content to corrupt").unwrap();
        timeline::create_snapshot(&mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false).unwrap();

        let versions = timeline::list_versions(&repo, timeline_id, "a.txt").unwrap();
        let checksum = versions[0].content_checksum;
        let hex = checksum.to_hex();
        let block_path = repo.blocks().base().join(&hex[..2]).join(&hex);
        fs::write(&block_path, b"garbage bytes, wrong length entirely").unwrap();

        let action = BlobRepairAction::new(&repo, dir.path());
        let followup = action.verify().unwrap();
        assert!(followup.is_some());
    }

    #[test]
    fn repair_restores_a_block_from_the_current_working_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::create(dir.path().join("repo"), RepositoryConfig::default()).unwrap();
        let timeline_id = timeline::create_timeline(&mut repo).unwrap();
        fs::write(dir.path().join("a.txt"), b"content that survives on disk").unwrap();
        timeline::create_snapshot(&mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false).unwrap();

        let versions = timeline::list_versions(&repo, timeline_id, "a.txt").unwrap();
        let checksum = versions[0].content_checksum;
        let hex = checksum.to_hex();
        let block_path = repo.blocks().base().join(&hex[..2]).join(&hex);
        fs::write(&block_path, b"corrupted").unwrap();

        let action = BlobRepairAction::new(&repo, dir.path());
        let followup = action.verify().unwrap().expect("expected corruption");
        let result = followup.repair().unwrap();
        assert!(result.success);

        // a.txt on disk still holds the original bytes, so rechunking it
        // must have restored the block and a second verify should be clean.
        let action_again = BlobRepairAction::new(&repo, dir.path());
        assert!(action_again.verify().unwrap().is_none());
    }
}
