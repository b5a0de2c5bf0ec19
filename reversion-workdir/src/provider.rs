//! The seam between a work directory and however a collaborator wants to
//! find or create the repository it binds to.
//!
//! `spec.md` §9 describes "global application state (data directory,
//! default provider, daemon singleton)" as mapping to "explicitly
//! constructed, composition-root objects passed by reference" rather than
//! process-wide statics. [`RepositoryProvider`] is that seam: [`init`]
//! asks a provider to create or open the repository a new work directory
//! should bind to, instead of hard-coding `Repository::create`/`open`
//! itself. A CLI or GUI collaborator supplies its own provider (e.g. one
//! backed by the default application data directory); tests use
//! [`LocalRepositoryProvider`] directly against a path.

use std::path::Path;

use anyhow::Error;
use reversion_api_types::RepositoryConfig;
use reversion_core::Repository;

pub trait RepositoryProvider {
    fn create_repository(&self, path: &Path, config: RepositoryConfig) -> Result<Repository, Error>;
    fn open_repository(&self, path: &Path) -> Result<Repository, Error>;
}

/// Creates or opens a repository directly at the path it is given, with no
/// notion of a default location. The composition root (`reversion`'s
/// top-level `lib.rs`) layers default-path resolution on top of this.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRepositoryProvider;

impl RepositoryProvider for LocalRepositoryProvider {
    fn create_repository(&self, path: &Path, config: RepositoryConfig) -> Result<Repository, Error> {
        Repository::create(path, config)
    }

    fn open_repository(&self, path: &Path) -> Result<Repository, Error> {
        Repository::open(path)
    }
}
