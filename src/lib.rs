//! Composition root for reversion.
//!
//! Wires the storage engine (`reversion-core`), the work directory binding
//! (`reversion-workdir`), and the watch daemon (`reversion-daemon`)
//! together with the one thing none of them know how to find on their
//! own: where on this machine the default repository and daemon state
//! live. A CLI or GUI collaborator depends on this crate rather than
//! assembling the lower crates itself.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use directories::ProjectDirs;

use reversion_api_types::RepositoryConfig;
use reversion_core::Repository;
use reversion_workdir::{LocalRepositoryProvider, RepositoryProvider};

pub use reversion_api_types as api_types;
pub use reversion_core as core;
pub use reversion_daemon as daemon;
pub use reversion_workdir as workdir;

pub use reversion_daemon::Daemon;
pub use reversion_workdir::WorkDirectory;

const QUALIFIER: &str = "";
const ORGANIZATION: &str = "";
const APPLICATION: &str = "reversion";

/// Overrides the default repository location; mirrors `PBS_REPOSITORY` in
/// spirit, but for the single local repository this system manages.
const DEFAULT_REPO_ENV_VAR: &str = "REVERSION_DEFAULT_REPO";

fn project_dirs() -> Result<ProjectDirs, Error> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .context("unable to determine application directories for this platform")
}

/// The application-wide data, config, and cache directories this system
/// resolves on each platform, and the default repository location derived
/// from them.
#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
    config_dir: PathBuf,
    cache_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the platform's application directories for reversion.
    pub fn discover() -> Result<Self, Error> {
        let dirs = project_dirs()?;
        Ok(AppPaths {
            data_dir: dirs.data_dir().to_path_buf(),
            config_dir: dirs.config_dir().to_path_buf(),
            cache_dir: dirs.cache_dir().to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where the daemon persists `registered.json`/`tracked.json`.
    pub fn daemon_state_dir(&self) -> PathBuf {
        self.data_dir.join("daemon")
    }

    /// The default repository location: `REVERSION_DEFAULT_REPO` if set,
    /// otherwise `<data_dir>/repository`.
    pub fn default_repository_path(&self) -> PathBuf {
        match env::var_os(DEFAULT_REPO_ENV_VAR) {
            Some(value) => PathBuf::from(value),
            None => self.data_dir.join("repository"),
        }
    }
}

/// A [`RepositoryProvider`] that resolves a relative or absent path against
/// [`AppPaths::default_repository_path`] before delegating to
/// [`LocalRepositoryProvider`]. A collaborator that wants "just use the
/// default repository" passes this provider and the empty path.
pub struct DefaultRepositoryProvider {
    paths: AppPaths,
    inner: LocalRepositoryProvider,
}

impl DefaultRepositoryProvider {
    pub fn new(paths: AppPaths) -> Self {
        DefaultRepositoryProvider {
            paths,
            inner: LocalRepositoryProvider,
        }
    }

    /// Resolve the default repository path, creating it if necessary. Used
    /// by collaborators that want a ready-to-bind repository without
    /// caring whether one already existed.
    pub fn default_repository(&self, config: RepositoryConfig) -> Result<Repository, Error> {
        let path = self.paths.default_repository_path();
        match Repository::check(&path)? {
            reversion_core::CheckResult::Uninitialized => self.inner.create_repository(&path, config),
            _ => self.inner.open_repository(&path),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.as_os_str().is_empty() {
            self.paths.default_repository_path()
        } else {
            path.to_path_buf()
        }
    }
}

impl RepositoryProvider for DefaultRepositoryProvider {
    fn create_repository(&self, path: &Path, config: RepositoryConfig) -> Result<Repository, Error> {
        self.inner.create_repository(&self.resolve(path), config)
    }

    fn open_repository(&self, path: &Path) -> Result<Repository, Error> {
        self.inner.open_repository(&self.resolve(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_repository_path_honors_env_override() {
        let paths = AppPaths {
            data_dir: PathBuf::from("/tmp/reversion-test-data"),
            config_dir: PathBuf::from("/tmp/reversion-test-config"),
            cache_dir: PathBuf::from("/tmp/reversion-test-cache"),
        };

        env::remove_var(DEFAULT_REPO_ENV_VAR);
        assert_eq!(
            paths.default_repository_path(),
            PathBuf::from("/tmp/reversion-test-data/repository")
        );

        env::set_var(DEFAULT_REPO_ENV_VAR, "/custom/repo");
        assert_eq!(paths.default_repository_path(), PathBuf::from("/custom/repo"));
        env::remove_var(DEFAULT_REPO_ENV_VAR);
    }

    #[test]
    fn provider_resolves_empty_path_to_the_default_repository() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths {
            data_dir: dir.path().to_path_buf(),
            config_dir: dir.path().join("config"),
            cache_dir: dir.path().join("cache"),
        };
        let provider = DefaultRepositoryProvider::new(paths);

        let repo = provider
            .create_repository(Path::new(""), RepositoryConfig::default())
            .unwrap();
        drop(repo);

        assert!(dir.path().join("repository").exists());
    }
}
