//! Persisted sets of absolute work-directory paths: `registered.json` and
//! `tracked.json` under the application data directory (`spec.md` §6).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};

/// A JSON array of absolute path strings, loaded and saved as a set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PathSet(HashSet<PathBuf>);

impl PathSet {
    pub fn new() -> Self {
        PathSet(HashSet::new())
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let paths: Vec<PathBuf> = serde_json::from_str(&text)
                    .with_context(|| format!("malformed path set at {path:?}"))?;
                Ok(PathSet(paths.into_iter().collect()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PathSet::new()),
            Err(err) => Err(err).with_context(|| format!("unable to read {path:?}")),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("unable to create {parent:?}"))?;
        }
        let paths: Vec<&PathBuf> = self.0.iter().collect();
        let text = serde_json::to_string_pretty(&paths)
            .context("unable to serialize path set")?;
        fs::write(path, text).with_context(|| format!("unable to write {path:?}"))
    }

    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.0.insert(path)
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.0.remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.0.iter()
    }

    pub fn snapshot(&self) -> HashSet<PathBuf> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registered.json");

        let mut set = PathSet::new();
        set.insert(PathBuf::from("/home/user/docs"));
        set.insert(PathBuf::from("/home/user/photos"));
        set.save(&path).unwrap();

        let loaded = PathSet::load(&path).unwrap();
        assert_eq!(loaded, set);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = PathSet::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, PathSet::new());
    }
}
