//! Binding a filesystem subtree to a repository + timeline: `spec.md`
//! §4.7's work directory, with its commit/restore/list/clean surface.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};
use reversion_api_types::{CleanupPolicy, RepairAction, RepositoryConfig, ReversionError, TimeUnit};
use reversion_core::{snapshot, timeline, version, Repository};
use uuid::Uuid;

use crate::document::WorkDirDocument;
use crate::ignore::{Candidate, Category, IgnoreMatcher};
use crate::provider::RepositoryProvider;

/// The hidden control directory a work directory keeps under its root.
pub const HIDDEN_DIR_NAME: &str = ".reversion";
const DOCUMENT_FILE_NAME: &str = "workdir.json";

fn hidden_dir(root: &Path) -> PathBuf {
    root.join(HIDDEN_DIR_NAME)
}

fn document_path(root: &Path) -> PathBuf {
    hidden_dir(root).join(DOCUMENT_FILE_NAME)
}

/// The default ignore list a freshly-initialized work directory carries:
/// its own control directory, plus this application's cache/data/config
/// directories wherever the OS puts them, so a work root that happens to
/// contain them doesn't end up recursively tracking itself.
pub fn default_ignore_matchers(root: &Path) -> Vec<IgnoreMatcher> {
    vec![
        IgnoreMatcher::prefix(HIDDEN_DIR_NAME, root),
        IgnoreMatcher::category(Category::Application),
        IgnoreMatcher::category(Category::Cache),
    ]
}

/// The sensible default retention described in `spec.md` §4.7: staggered
/// policies at five time scales, finest first.
pub fn default_cleanup_policies() -> Vec<CleanupPolicy> {
    vec![
        CleanupPolicy::of_staggered(1, TimeUnit::Seconds),
        CleanupPolicy::of_staggered(60, TimeUnit::Minutes),
        CleanupPolicy::of_staggered(24, TimeUnit::Hours),
        CleanupPolicy::of_staggered(30, TimeUnit::Days),
        CleanupPolicy::of_staggered(52, TimeUnit::Weeks),
    ]
}

fn relative_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// A working directory bound to a repository and one of its timelines.
pub struct WorkDirectory {
    root: PathBuf,
    repo: Repository,
    timeline_id: Uuid,
    ignore_matchers: Vec<IgnoreMatcher>,
}

impl WorkDirectory {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn timeline_id(&self) -> Uuid {
        self.timeline_id
    }

    pub fn ignore_matchers(&self) -> &[IgnoreMatcher] {
        &self.ignore_matchers
    }

    /// Bind `root` to a repository at `repository_path`, creating it via
    /// `provider` if it doesn't already exist there, opening it otherwise.
    /// Creates a new timeline with the default staggered retention and
    /// persists the work directory document. Fails with
    /// [`ReversionError::AlreadyExists`] if `root` is already a work
    /// directory.
    pub fn init(
        root: impl Into<PathBuf>,
        provider: &dyn RepositoryProvider,
        repository_path: &Path,
        config: RepositoryConfig,
    ) -> Result<Self, Error> {
        let root = root.into();
        let control_dir = hidden_dir(&root);
        if control_dir.exists() {
            return Err(ReversionError::AlreadyExists(control_dir).into());
        }

        fs::create_dir_all(&root)
            .with_context(|| format!("unable to create work directory root {root:?}"))?;
        fs::create_dir_all(&control_dir)
            .with_context(|| format!("unable to create {control_dir:?}"))?;

        let mut repo = match Repository::check(repository_path)? {
            reversion_core::CheckResult::Uninitialized => {
                provider.create_repository(repository_path, config)?
            }
            _ => provider.open_repository(repository_path)?,
        };

        let timeline_id = timeline::create_timeline(&mut repo)?;
        for policy in default_cleanup_policies() {
            timeline::add_cleanup_policy(&mut repo, timeline_id, &policy)?;
        }

        let ignore_matchers = default_ignore_matchers(&root);

        let document = WorkDirDocument {
            repository_path: repository_path.to_path_buf(),
            timeline_id,
            ignore_matchers: ignore_matchers.clone(),
            settings: serde_json::Value::Null,
        };
        document.save(&document_path(&root))?;

        Ok(WorkDirectory {
            root,
            repo,
            timeline_id,
            ignore_matchers,
        })
    }

    /// Load the work directory document under `root` and open the
    /// repository it names.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        let document = WorkDirDocument::load(&document_path(&root))?;
        let repo = Repository::open(&document.repository_path)?;
        Ok(WorkDirectory {
            root,
            repo,
            timeline_id: document.timeline_id,
            ignore_matchers: document.ignore_matchers,
        })
    }

    /// Walk the ancestors of `path` until a work directory's control
    /// directory is found, then open it.
    pub fn open_from_descendant(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let start = if path.is_dir() { path } else { path.parent().unwrap_or(path) };
        for ancestor in start.ancestors() {
            if document_path(ancestor).is_file() {
                return Self::open(ancestor);
            }
        }
        bail!("no work directory found above {path:?}")
    }

    /// The repair recommendations for this work directory's repository,
    /// scoped to this root so a confirmed repair can rechunk live files.
    pub fn repair_actions(&self) -> Vec<Box<dyn RepairAction + '_>> {
        self.repo.verify(self.root.clone())
    }

    /// Create a snapshot of `paths` (relative to the root). Paths whose
    /// content checksum matches their latest committed version are skipped
    /// unless `force` is set; if every path is skipped, no snapshot is
    /// created and `Ok(None)` is returned.
    pub fn commit(&mut self, paths: &[PathBuf], force: bool) -> Result<Option<i64>, Error> {
        let mut to_commit = Vec::with_capacity(paths.len());
        for path in paths {
            if force {
                to_commit.push(path.clone());
                continue;
            }
            let relative = relative_string(path);
            let existing = timeline::list_versions(&self.repo, self.timeline_id, &relative)?;
            match existing.first() {
                Some(latest) => {
                    let absolute = self.root.join(path);
                    if version::is_changed(latest, &absolute)? {
                        to_commit.push(path.clone());
                    }
                }
                None => to_commit.push(path.clone()),
            }
        }

        if to_commit.is_empty() {
            return Ok(None);
        }

        let revision = timeline::create_snapshot(
            &mut self.repo,
            self.timeline_id,
            &self.root,
            &to_commit,
            None,
            "",
            false,
        )?;
        Ok(Some(revision))
    }

    /// Restore each of `paths` from the state of the timeline at-or-before
    /// `revision`. Paths with no version at-or-before that revision are
    /// left untouched.
    pub fn restore(&self, paths: &[PathBuf], revision: i64) -> Result<(), Error> {
        let as_of = snapshot::cumulative_versions(&self.repo, self.timeline_id, revision)?;
        for path in paths {
            let relative = relative_string(path);
            if let Some(entry) = as_of.get(&relative) {
                let target = self.root.join(path);
                version::checkout(&self.repo, entry, &target, true)?;
            }
        }
        Ok(())
    }

    /// Apply retention policies to `paths` (or every known path when
    /// `None`), then sweep the block store.
    pub fn clean(&mut self, paths: Option<&[String]>) -> Result<(), Error> {
        timeline::clean(&mut self.repo, self.timeline_id, paths)
    }

    /// Walk the tree under the root, returning every file not excluded by
    /// an ignore matcher.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, Error> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| !self.is_ignored_entry(entry))
        {
            let entry = entry?;
            if entry.file_type().is_file() {
                let relative = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(entry.path())
                    .to_path_buf();
                out.push(relative);
            }
        }
        Ok(out)
    }

    fn is_ignored_entry(&self, entry: &walkdir::DirEntry) -> bool {
        if entry.path() == self.root {
            return false;
        }
        let relative = match entry.path().strip_prefix(&self.root) {
            Ok(relative) => relative,
            Err(_) => return false,
        };
        let size = entry.metadata().ok().map(|metadata| metadata.len());
        let candidate = Candidate {
            relative,
            absolute: entry.path(),
            size,
        };
        self.ignore_matchers
            .iter()
            .any(|matcher| matcher.matches(&candidate, &self.root).unwrap_or(false))
    }

    /// Whether `path` (relative to the root) is excluded by any configured
    /// ignore matcher.
    pub fn is_ignored(&self, path: &Path) -> Result<bool, Error> {
        let absolute = self.root.join(path);
        let size = fs::metadata(&absolute).ok().map(|metadata| metadata.len());
        let candidate = Candidate {
            relative: path,
            absolute: &absolute,
            size,
        };
        for matcher in &self.ignore_matchers {
            if matcher.matches(&candidate, &self.root)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Remove the control directory and the associated timeline. The
    /// repository itself (and any other timeline it holds) is untouched.
    pub fn delete(mut self) -> Result<(), Error> {
        timeline::remove_timeline(&mut self.repo, self.timeline_id)?;
        fs::remove_dir_all(hidden_dir(&self.root))
            .with_context(|| format!("unable to remove {:?}", hidden_dir(&self.root)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LocalRepositoryProvider;
    use std::path::PathBuf;

    fn init_workdir(dir: &Path) -> WorkDirectory {
        WorkDirectory::init(
            dir.join("work"),
            &LocalRepositoryProvider,
            &dir.join("repo"),
            RepositoryConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn init_creates_timeline_with_default_policies() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = init_workdir(dir.path());
        let policies = timeline::cleanup_policies(&workdir.repo, workdir.timeline_id).unwrap();
        assert_eq!(policies.len(), 5);
    }

    #[test]
    fn open_reloads_the_same_binding() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = init_workdir(dir.path());
        let root = workdir.root().to_path_buf();
        let timeline_id = workdir.timeline_id();
        drop(workdir);

        let reopened = WorkDirectory::open(&root).unwrap();
        assert_eq!(reopened.timeline_id(), timeline_id);
    }

    #[test]
    fn open_from_descendant_finds_ancestor_binding() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = init_workdir(dir.path());
        let root = workdir.root().to_path_buf();
        drop(workdir);

        let nested = root.join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        let found = WorkDirectory::open_from_descendant(&nested).unwrap();
        assert_eq!(found.root(), root);
    }

    #[test]
    fn commit_skips_unchanged_files_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let mut workdir = init_workdir(dir.path());
        fs::write(workdir.root().join("a.txt"), b"hello").unwrap();

        let r1 = workdir.commit(&[PathBuf::from("a.txt")], false).unwrap();
        assert!(r1.is_some());

        let r2 = workdir.commit(&[PathBuf::from("a.txt")], false).unwrap();
        assert!(r2.is_none(), "unchanged file must not create a new snapshot");

        let r3 = workdir.commit(&[PathBuf::from("a.txt")], true).unwrap();
        assert!(r3.is_some(), "force=true must create a snapshot even if unchanged");
    }

    #[test]
    fn restore_leaves_unversioned_paths_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut workdir = init_workdir(dir.path());
        fs::write(workdir.root().join("a.txt"), b"v1").unwrap();
        let revision = workdir.commit(&[PathBuf::from("a.txt")], false).unwrap().unwrap();

        fs::write(workdir.root().join("untracked.txt"), b"never committed").unwrap();
        workdir
            .restore(&[PathBuf::from("a.txt"), PathBuf::from("untracked.txt")], revision)
            .unwrap();

        assert_eq!(fs::read(workdir.root().join("untracked.txt")).unwrap(), b"never committed");
    }

    #[test]
    fn list_files_excludes_the_control_directory() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = init_workdir(dir.path());
        fs::write(workdir.root().join("tracked.txt"), b"data").unwrap();

        let files = workdir.list_files().unwrap();
        assert!(files.contains(&PathBuf::from("tracked.txt")));
        assert!(!files.iter().any(|p| p.starts_with(HIDDEN_DIR_NAME)));
    }

    #[test]
    fn delete_removes_control_directory_and_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = init_workdir(dir.path());
        let root = workdir.root().to_path_buf();
        workdir.delete().unwrap();
        assert!(!hidden_dir(&root).exists());
    }
}
