//! Binds a filesystem subtree to a repository + timeline and exposes the
//! file-level operations (`commit`/`restore`/`list`/`clean`) a collaborator
//! (CLI, GUI, watch daemon) drives. The direct analogue of a teacher
//! `BackupWriter`/`BackupReader` pairing scoped to one local directory
//! instead of a client/server backup run.

pub mod document;
pub mod ignore;
pub mod provider;
pub mod workdir;

pub use document::WorkDirDocument;
pub use ignore::{Candidate, Category, IgnoreMatcher};
pub use provider::{LocalRepositoryProvider, RepositoryProvider};
pub use workdir::{default_cleanup_policies, default_ignore_matchers, WorkDirectory, HIDDEN_DIR_NAME};
