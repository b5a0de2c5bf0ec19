//! A per-work-directory task queue: `spec.md` §9's mapping of the source's
//! coroutine actor/channel onto a worker thread fed by an MPSC channel.
//!
//! UI-driven and daemon-driven operations on the same work directory submit
//! closures to the same [`TaskQueue`], so they can never interleave in a
//! way that violates the single-writer discipline of `spec.md` §5 — the
//! queue processes them strictly one at a time, in submission order.

use std::sync::mpsc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A FIFO queue of closures, drained one at a time by a dedicated worker
/// thread. Dropping the queue closes the channel and blocks until the
/// worker has finished whatever it was running plus anything already
/// queued — "awaits its termination," per `spec.md` §5's cancellation
/// rules.
pub struct TaskQueue {
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::spawn(move || {
            for job in receiver {
                job();
            }
        });
        TaskQueue {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Enqueue `job`. Silently dropped if the queue is shutting down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Dropping the sender closes the channel; the worker's `for job in
        // receiver` loop then drains whatever is already queued and exits.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn jobs_run_in_submission_order() {
        let queue = TaskQueue::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..10 {
            let order = order.clone();
            queue.submit(move || order.lock().unwrap().push(i));
        }
        drop(queue); // waits for all submitted jobs to finish

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn drop_awaits_in_flight_job() {
        let queue = TaskQueue::new();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();
        queue.submit(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            done2.store(1, Ordering::SeqCst);
        });
        drop(queue);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
