//! The persisted work-directory document: `spec.md` §6's JSON blob under
//! the hidden control directory, recording which repository and timeline
//! this directory is bound to and its ignore rules.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ignore::IgnoreMatcher;

/// `<workRoot>/.reversion/workdir.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkDirDocument {
    #[serde(rename = "repositoryPath")]
    pub repository_path: PathBuf,
    #[serde(rename = "timelineId")]
    pub timeline_id: Uuid,
    #[serde(rename = "ignoreMatchers")]
    pub ignore_matchers: Vec<IgnoreMatcher>,
    /// Application-owned settings a collaborator (CLI/GUI) wants persisted
    /// alongside the binding. The core never reads or writes into this;
    /// it is round-tripped opaquely, the same way `RepositoryConfig.extra`
    /// preserves unknown `config.json` keys.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub settings: Value,
}

impl WorkDirDocument {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read work directory document at {path:?}"))?;
        serde_json::from_str(&text)
            .with_context(|| format!("malformed work directory document at {path:?}"))
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let text = serde_json::to_string_pretty(self)
            .context("unable to serialize work directory document")?;
        fs::write(path, text)
            .with_context(|| format!("unable to write work directory document at {path:?}"))
    }
}
