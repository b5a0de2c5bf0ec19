//! Shared value types for the reversion storage engine.
//!
//! This crate has no dependency on the storage engine itself, the way
//! `pbs-api-types` is depended on by every other `pbs-*` crate without
//! pulling in the datastore. It carries the checksum type, the error
//! taxonomy, configuration and cleanup-policy value types, the repair
//! protocol traits, and the repository format marker.

mod checksum;
mod config;
mod error;
mod format;
mod policy;
mod repair;

pub use checksum::{Checksum, CHECKSUM_SIZE};
pub use config::{ChunkingMode, ConfigProperty, PropertyValue, RepositoryConfig};
pub use error::ReversionError;
pub use format::{is_supported_format, FORMAT_V1, VERSION_FILE_NAME};
pub use policy::{CleanupPolicy, TimeUnit, UNLIMITED_VERSIONS};
pub use repair::{FollowupAction, RepairAction, RepairResult};
