use std::path::PathBuf;

use thiserror::Error;

use crate::Checksum;

/// The error taxonomy callers are expected to match on.
///
/// Lower-level plumbing keeps using `anyhow::Error`, the way `pbs-datastore`
/// does; these variants are the kinds collaborators (the watch daemon, the
/// CLI, the GUI) need to tell apart, wrapped inside an `anyhow::Error` when
/// propagated through `?`.
#[derive(Debug, Error)]
pub enum ReversionError {
    #[error("no such file: {0:?}")]
    NoSuchFile(PathBuf),

    #[error("already exists: {0:?}")]
    AlreadyExists(PathBuf),

    #[error("incompatible repository format at {path:?}: got {found:?}")]
    IncompatibleRepository { path: PathBuf, found: String },

    #[error("invalid repository at {path:?}: {reason}")]
    InvalidRepository { path: PathBuf, reason: String },

    #[error("missing block {0}")]
    MissingBlock(Checksum),

    #[error("corrupt block {checksum}: {reason}")]
    CorruptBlock { checksum: Checksum, reason: String },

    #[error("invalid value for property '{property}': {text:?} ({reason})")]
    ValueConvert {
        property: String,
        text: String,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReversionError {
    pub fn value_convert(
        property: impl Into<String>,
        text: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ReversionError::ValueConvert {
            property: property.into(),
            text: text.into(),
            reason: reason.into(),
        }
    }
}
