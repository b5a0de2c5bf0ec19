//! The periodic maintenance job launched for every registered repository
//! (`spec.md` §6): retention sweeps run on a timer rather than in response
//! to an event, independent of whether the work directory is also tracked
//! for auto-commit.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reversion_workdir::WorkDirectory;

/// How often a registered work directory's retention policies are applied.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const POLL_STEP: Duration = Duration::from_millis(500);

/// A background sweep timer for one registered work directory. Dropping it
/// stops the sweep after the current tick (if any) finishes.
pub struct RepositoryJob {
    cancel: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl RepositoryJob {
    pub fn spawn(root: PathBuf) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_thread = cancel.clone();
        let worker = std::thread::spawn(move || run(root, cancel_thread));
        RepositoryJob {
            cancel,
            worker: Some(worker),
        }
    }
}

impl Drop for RepositoryJob {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(root: PathBuf, cancel: Arc<AtomicBool>) {
    let mut waited = Duration::ZERO;
    while !cancel.load(Ordering::SeqCst) {
        if waited < SWEEP_INTERVAL {
            std::thread::sleep(POLL_STEP);
            waited += POLL_STEP;
            continue;
        }
        waited = Duration::ZERO;

        match WorkDirectory::open(&root) {
            Ok(mut workdir) => {
                if let Err(err) = workdir.clean(None) {
                    log::warn!("scheduled cleanup of {root:?} failed: {err:#}");
                }
            }
            Err(err) => {
                log::debug!("skipping cleanup tick for {root:?}, work directory unavailable: {err:#}");
            }
        }
    }
}
