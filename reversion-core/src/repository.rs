//! The durable container for timelines, configuration, and the block store.
//!
//! A repository is a directory with the layout fixed by `spec.md` §4.3:
//!
//! ```text
//! <repo>/
//!   version       (written last, so a partial create reads as incompatible)
//!   config.json
//!   manifest.db
//!   blobs/<xx>/<full-hex>
//! ```
//!
//! `Repository::create` mirrors the teacher's `ChunkStore::create`: build
//! every subdirectory and file, then only at the very end write the marker
//! that makes the directory recognizable, so a process that dies partway
//! through leaves something `check()` correctly calls incomplete.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};

use reversion_api_types::{
    is_supported_format, FollowupAction, RepairAction, RepositoryConfig, ReversionError,
    FORMAT_V1, VERSION_FILE_NAME,
};

use crate::block_store::BlockStore;
use crate::db::Database;
use crate::integrity::BlobRepairAction;

const CONFIG_FILE_NAME: &str = "config.json";
const DATABASE_FILE_NAME: &str = "manifest.db";
const BLOBS_DIR_NAME: &str = "blobs";

/// An open repository: a block store, a metadata database, and the
/// configuration they were opened with.
pub struct Repository {
    root: PathBuf,
    config: RepositoryConfig,
    db: Database,
    blocks: BlockStore,
}

/// A cheap, pre-database inspection of a repository directory.
pub enum CheckResult {
    /// No `version` marker at all; the directory is not a repository.
    Uninitialized,
    /// A `version` marker this implementation understands.
    Compatible,
    /// A `version` marker this implementation does not understand.
    Incompatible(String),
}

impl Repository {
    /// Cheaply inspect `path` without opening the database. Mirrors
    /// `spec.md` §4.3's `check(path)`.
    pub fn check(path: &Path) -> Result<CheckResult, Error> {
        let marker_path = path.join(VERSION_FILE_NAME);
        let text = match fs::read_to_string(&marker_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CheckResult::Uninitialized)
            }
            Err(err) => return Err(err.into()),
        };
        if is_supported_format(&text) {
            Ok(CheckResult::Compatible)
        } else {
            Ok(CheckResult::Incompatible(text.trim().to_owned()))
        }
    }

    /// Create a new repository at `path`. Fails with
    /// [`ReversionError::AlreadyExists`] if `path` already exists.
    pub fn create(path: impl Into<PathBuf>, config: RepositoryConfig) -> Result<Self, Error> {
        config.validate()?;
        let root: PathBuf = path.into();

        if root.exists() {
            return Err(ReversionError::AlreadyExists(root).into());
        }

        fs::create_dir_all(&root)
            .with_context(|| format!("unable to create repository directory {root:?}"))?;

        let blocks = BlockStore::create(root.join(BLOBS_DIR_NAME))?;
        let db = Database::open(&root.join(DATABASE_FILE_NAME))?;

        let config_text = serde_json::to_string_pretty(&config)
            .context("unable to serialize repository configuration")?;
        fs::write(root.join(CONFIG_FILE_NAME), config_text)
            .context("unable to write config.json")?;

        // Written last: a repository without this marker is indistinguishable
        // from one whose creation never finished.
        fs::write(root.join(VERSION_FILE_NAME), FORMAT_V1.to_string())
            .context("unable to write version marker")?;

        Ok(Repository {
            root,
            config,
            db,
            blocks,
        })
    }

    /// Open an existing repository. Fails if the `version` marker is
    /// missing or unrecognized; callers should use [`Repository::check`]
    /// first to distinguish "not a repository" from "needs repair".
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let root: PathBuf = path.into();

        match Self::check(&root)? {
            CheckResult::Uninitialized => {
                return Err(ReversionError::NoSuchFile(root.join(VERSION_FILE_NAME)).into())
            }
            CheckResult::Incompatible(found) => {
                return Err(ReversionError::IncompatibleRepository { path: root, found }.into())
            }
            CheckResult::Compatible => {}
        }

        let config_text = fs::read_to_string(root.join(CONFIG_FILE_NAME))
            .with_context(|| format!("unable to read {CONFIG_FILE_NAME} under {root:?}"))?;
        let config: RepositoryConfig = serde_json::from_str(&config_text).map_err(|err| {
            ReversionError::InvalidRepository {
                path: root.clone(),
                reason: format!("malformed {CONFIG_FILE_NAME}: {err}"),
            }
        })?;
        config.validate()?;

        let db = Database::open(&root.join(DATABASE_FILE_NAME))?;
        let blocks = BlockStore::open(root.join(BLOBS_DIR_NAME))?;

        Ok(Repository {
            root,
            config,
            db,
            blocks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// The lazy sequence of repair recommendations described in `spec.md`
    /// §4.6, scoped to `work_root` (the working-directory tree repair can
    /// rechunk to recover corrupt blocks). Currently a single action
    /// scanning the block store; more categories of check can be appended
    /// here without disturbing callers, since each is independently cheap to
    /// construct and only does work inside `verify()`.
    pub fn verify(&self, work_root: impl Into<PathBuf>) -> Vec<Box<dyn RepairAction + '_>> {
        vec![Box::new(BlobRepairAction::new(self, work_root))]
    }

    /// For every on-disk block unreferenced by any chunk reference, delete
    /// it. Run after cleanup deletes versions, per `spec.md` §4.5.
    pub fn sweep(&self) -> Result<u64, Error> {
        self.blocks.sweep(self.db.conn())
    }
}

/// Run every repair action's `verify()` and, for any that find something
/// wrong, its `repair()`. Returns the repair messages, in the order the
/// actions were produced by [`Repository::verify`].
pub fn repair_all(repository: &Repository, work_root: impl Into<PathBuf>) -> Result<Vec<String>, Error> {
    let mut messages = Vec::new();
    for action in repository.verify(work_root.into()) {
        if let Some(followup) = action.verify()? {
            let result = followup.repair()?;
            messages.push(result.message);
        }
    }
    Ok(messages)
}
