//! The storage engine: content-addressed block store, chunker, repository
//! container, and the timeline/snapshot/version history built on top of it.
//!
//! This is the direct analogue of the teacher's `pbs-datastore`: it owns
//! every on-disk invariant (blocks written before catalog rows, catalog
//! rows deleted before blocks, revisions strictly increasing) and every
//! collaborator — the work directory crate, the watch daemon, eventually a
//! CLI or GUI — goes through it rather than touching `manifest.db` or
//! `blobs/` directly.

pub mod block_store;
pub mod chunker;
pub mod cleanup;
pub mod db;
pub mod integrity;
pub mod repository;
pub mod snapshot;
pub mod timeline;
pub mod version;

pub use block_store::BlockStore;
pub use chunker::Chunker;
pub use db::Database;
pub use integrity::{BlobFollowupAction, BlobRepairAction, CorruptBlock};
pub use repository::{repair_all, CheckResult, Repository};
pub use snapshot::SnapshotMeta;
pub use version::VersionMeta;
