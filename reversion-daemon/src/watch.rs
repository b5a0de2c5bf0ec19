//! Filesystem-event-driven automatic commits for a single tracked work
//! directory (`spec.md` §4.8).
//!
//! Grounded on the teacher pack's `notify`-based watcher
//! (`codegraph-ir`'s `FileWatcher`): a `RecommendedWatcher` feeds a channel
//! consumed on a dedicated thread, which coalesces bursts of events to the
//! same path within a short window before acting. Where that watcher hands
//! events straight to a handler, this one submits a commit+clean closure to
//! the tracked directory's [`TaskQueue`], so auto-commits are serialized
//! against any interactive operation on the same work directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Error;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;

use reversion_workdir::WorkDirectory;

use crate::queue::TaskQueue;

/// Events to the same path within this window collapse into one.
const COALESCE_WINDOW: Duration = Duration::from_millis(300);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn relative_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// A background watcher + commit pipeline for one tracked work directory.
/// Dropping it cancels the watcher: in-flight commits run to completion,
/// but no further filesystem events are consumed (`spec.md` §5).
pub struct WatchJob {
    cancel: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl WatchJob {
    pub fn spawn(root: PathBuf) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_thread = cancel.clone();
        let worker = std::thread::spawn(move || {
            if let Err(err) = run(root.clone(), cancel_thread) {
                log::warn!("watch job for {root:?} exited: {err:#}");
            }
        });
        WatchJob {
            cancel,
            worker: Some(worker),
        }
    }
}

impl Drop for WatchJob {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(root: PathBuf, cancel: Arc<AtomicBool>) -> Result<(), Error> {
    let workdir = WorkDirectory::open(&root)?;
    let queue = TaskQueue::new();

    let (tx, rx) = mpsc::channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(err) => log::warn!("filesystem watch error: {err}"),
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    let mut last_seen: HashMap<PathBuf, Instant> = HashMap::new();

    while !cancel.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for absolute in event.paths {
                    let relative = match absolute.strip_prefix(&root) {
                        Ok(relative) => relative.to_path_buf(),
                        Err(_) => continue,
                    };
                    if workdir.is_ignored(&relative).unwrap_or(true) {
                        continue;
                    }

                    let now = Instant::now();
                    if let Some(previous) = last_seen.get(&absolute) {
                        if now.duration_since(*previous) < COALESCE_WINDOW {
                            last_seen.insert(absolute.clone(), now);
                            continue;
                        }
                    }
                    last_seen.insert(absolute.clone(), now);

                    let root = root.clone();
                    queue.submit(move || commit_and_clean(&root, &relative));
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                last_seen.retain(|_, seen| now.duration_since(*seen) < COALESCE_WINDOW * 2);
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

/// Runs on the tracked directory's [`TaskQueue`], never on the watcher
/// thread itself: `WorkDirectory` opens its own database connection per
/// invocation, so there is no need to share one across threads.
fn commit_and_clean(root: &Path, relative: &Path) {
    let mut workdir = match WorkDirectory::open(root) {
        Ok(workdir) => workdir,
        Err(err) => {
            log::warn!("unable to open work directory {root:?}: {err:#}");
            return;
        }
    };

    if let Err(err) = workdir.commit(&[relative.to_path_buf()], false) {
        log::warn!("auto-commit of {relative:?} under {root:?} failed: {err:#}");
        return;
    }

    if let Err(err) = workdir.clean(Some(&[relative_string(relative)])) {
        log::warn!("cleanup of {relative:?} under {root:?} failed: {err:#}");
    }
}
