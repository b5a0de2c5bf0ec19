//! The process-wide scheduler: tracks which work directories are
//! registered for periodic maintenance and which are tracked for
//! filesystem-driven auto-commit, persists both sets, and replays them on
//! startup (`spec.md` §6).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Error;

use crate::jobs::RepositoryJob;
use crate::state::PathSet;
use crate::watch::WatchJob;

const REGISTERED_FILE_NAME: &str = "registered.json";
const TRACKED_FILE_NAME: &str = "tracked.json";

struct DaemonState {
    registered: PathSet,
    tracked: PathSet,
    repository_jobs: HashMap<PathBuf, RepositoryJob>,
    watch_jobs: HashMap<PathBuf, WatchJob>,
}

/// The daemon singleton a long-running process holds. Registering a path
/// launches its periodic retention sweep; tracking a path additionally
/// launches a filesystem watcher that auto-commits changes as they happen.
/// A work directory that fails to open when its job would start is logged
/// and silently skipped rather than aborting the daemon.
pub struct Daemon {
    data_dir: PathBuf,
    state: Mutex<DaemonState>,
}

impl Daemon {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Daemon {
            data_dir: data_dir.into(),
            state: Mutex::new(DaemonState {
                registered: PathSet::new(),
                tracked: PathSet::new(),
                repository_jobs: HashMap::new(),
                watch_jobs: HashMap::new(),
            }),
        }
    }

    fn registered_path(&self) -> PathBuf {
        self.data_dir.join(REGISTERED_FILE_NAME)
    }

    fn tracked_path(&self) -> PathBuf {
        self.data_dir.join(TRACKED_FILE_NAME)
    }

    /// Load the persisted registered/tracked sets and launch their jobs.
    /// Call once when the daemon process starts.
    pub fn start(&self) -> Result<(), Error> {
        let registered = PathSet::load(&self.registered_path())?;
        let tracked = PathSet::load(&self.tracked_path())?;

        let mut state = self.state.lock().unwrap();
        for path in registered.iter() {
            state
                .repository_jobs
                .insert(path.clone(), RepositoryJob::spawn(path.clone()));
        }
        for path in tracked.iter() {
            state.watch_jobs.insert(path.clone(), WatchJob::spawn(path.clone()));
        }
        state.registered = registered;
        state.tracked = tracked;
        Ok(())
    }

    /// Register `path` for periodic retention sweeps. A no-op if it is
    /// already registered.
    pub fn register(&self, path: PathBuf) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.registered.insert(path.clone()) {
            state.registered.save(&self.registered_path())?;
            state
                .repository_jobs
                .insert(path.clone(), RepositoryJob::spawn(path));
        }
        Ok(())
    }

    /// Unregister `path`, stopping its sweep and awaiting its termination.
    pub fn unregister(&self, path: &Path) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.registered.remove(path) {
            state.registered.save(&self.registered_path())?;
            state.repository_jobs.remove(path);
        }
        Ok(())
    }

    /// Track `path` for filesystem-driven auto-commit. A no-op if it is
    /// already tracked.
    pub fn track(&self, path: PathBuf) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.tracked.insert(path.clone()) {
            state.tracked.save(&self.tracked_path())?;
            state.watch_jobs.insert(path.clone(), WatchJob::spawn(path));
        }
        Ok(())
    }

    /// Untrack `path`, cancelling its watcher and awaiting its termination.
    pub fn untrack(&self, path: &Path) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.tracked.remove(path) {
            state.tracked.save(&self.tracked_path())?;
            state.watch_jobs.remove(path);
        }
        Ok(())
    }

    pub fn registered(&self) -> HashSet<PathBuf> {
        self.state.lock().unwrap().registered.snapshot()
    }

    pub fn tracked(&self) -> HashSet<PathBuf> {
        self.state.lock().unwrap().tracked.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_persists_and_relaunches_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("work");
        std::fs::create_dir_all(&target).unwrap();

        let daemon = Daemon::new(dir.path().join("state"));
        daemon.register(target.clone()).unwrap();
        assert!(daemon.registered().contains(&target));

        let restarted = Daemon::new(dir.path().join("state"));
        restarted.start().unwrap();
        assert!(restarted.registered().contains(&target));
    }

    #[test]
    fn unregister_removes_from_the_persisted_set() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("work");
        std::fs::create_dir_all(&target).unwrap();

        let daemon = Daemon::new(dir.path().join("state"));
        daemon.register(target.clone()).unwrap();
        daemon.unregister(&target).unwrap();
        assert!(!daemon.registered().contains(&target));
    }

    #[test]
    fn track_and_untrack_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("work");
        std::fs::create_dir_all(&target).unwrap();

        let daemon = Daemon::new(dir.path().join("state"));
        daemon.track(target.clone()).unwrap();
        assert!(daemon.tracked().contains(&target));

        daemon.untrack(&target).unwrap();
        assert!(!daemon.tracked().contains(&target));
    }
}
