//! A single file's recorded state within a snapshot.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Error};
use rusqlite::params;
use tempfile::NamedTempFile;

use reversion_api_types::Checksum;

use crate::repository::Repository;

/// A version's recorded metadata, as stored in the `version` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMeta {
    pub id: i64,
    pub snapshot_id: i64,
    pub path: String,
    pub last_modified: i64,
    pub size: i64,
    pub permissions: Option<u32>,
    pub content_checksum: Checksum,
}

/// Concatenate a version's chunks, in order, into its full byte content.
pub fn data(repo: &Repository, version_id: i64) -> Result<Vec<u8>, Error> {
    let mut stmt = repo.db().conn().prepare(
        "SELECT checksum FROM chunk_reference WHERE version_id = ?1 ORDER BY ordinal ASC",
    )?;
    let checksums: Vec<Vec<u8>> = stmt
        .query_map(params![version_id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let mut out = Vec::new();
    for raw in checksums {
        let mut digest = [0u8; reversion_api_types::CHECKSUM_SIZE];
        digest.copy_from_slice(&raw);
        let checksum = Checksum::new(digest);
        out.extend(repo.blocks().get(&checksum)?);
    }
    Ok(out)
}

/// Write a version's bytes to `target`. If `overwrite` is `false` and
/// `target` already exists, do nothing and return `false`. Otherwise
/// replace it (staged write + rename) and restore the recorded
/// modification time and, on Unix, permissions. Returns `true` on write.
pub fn checkout(repo: &Repository, version: &VersionMeta, target: &Path, overwrite: bool) -> Result<bool, Error> {
    if !overwrite && target.exists() {
        return Ok(false);
    }

    let bytes = data(repo, version.id)?;
    let parent = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("checkout target {target:?} has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("unable to create staging file in {parent:?}"))?;
    tmp.write_all(&bytes)?;
    tmp.persist(target)
        .with_context(|| format!("unable to finalize checkout at {target:?}"))?;

    let modified = UNIX_EPOCH + Duration::from_millis(version.last_modified.max(0) as u64);
    if let Ok(file) = File::open(target) {
        let _ = file.set_modified(modified);
    }

    #[cfg(unix)]
    if let Some(mode) = version.permissions {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(target, fs::Permissions::from_mode(mode));
    }

    Ok(true)
}

/// Whether the file currently at `path` has different content than this
/// version.
pub fn is_changed(version: &VersionMeta, path: &Path) -> Result<bool, Error> {
    let current = fs::read(path)?;
    Ok(Checksum::of(&current) != version.content_checksum)
}
