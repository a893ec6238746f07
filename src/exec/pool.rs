//! A small fixed thread pool.
//!
//! Jobs land on an unbounded injection queue; idle workers park on a condvar
//! and are woken one at a time. This is a dispatch target, not a scheduler:
//! there is no stealing, no priorities, no affinity.

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use super::{Executor, Job};
use crate::tracing_compat::rt_debug;

/// A fixed-size worker pool implementing [`Executor`].
///
/// Dropping the pool shuts it down: queued jobs drain, workers exit, and the
/// drop blocks until every worker has joined.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

struct PoolShared {
    queue: SegQueue<Job>,
    lock: Mutex<()>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

impl ThreadPool {
    /// Creates a pool with `workers` threads.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "thread pool needs at least one worker");
        let shared = Arc::new(PoolShared {
            queue: SegQueue::new(),
            lock: Mutex::new(()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let handles = (0..workers)
            .map(|index| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("taskfx-pool-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        rt_debug!(workers, "thread pool started");
        Self {
            shared,
            workers: handles,
        }
    }

    /// Returns a shared executor handle backed by a new pool.
    #[must_use]
    pub fn handle(workers: usize) -> super::ExecutorRef {
        Arc::new(Self::new(workers))
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        if let Some(job) = shared.queue.pop() {
            job();
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let mut guard = shared.lock.lock();
        // Re-check under the lock: a job may have been pushed between the
        // failed pop and acquiring the lock.
        if shared.queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
            shared.wakeup.wait(&mut guard);
        }
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        self.shared.queue.push(job);
        let _guard = self.shared.lock.lock();
        self.shared.wakeup.notify_one();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.lock.lock();
            self.shared.wakeup.notify_all();
        }
        let current = std::thread::current().id();
        for handle in self.workers.drain(..) {
            // The last handle can drop on a worker thread; that worker
            // exits on its own once the current job finishes.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let pool = ThreadPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let c = counter.clone();
            pool.execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 64 {
            assert!(std::time::Instant::now() < deadline, "pool stalled");
            std::thread::yield_now();
        }
    }

    #[test]
    fn drop_drains_and_joins() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(1);
            for _ in 0..8 {
                let c = counter.clone();
                pool.execute(Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        // Workers drain the queue before observing shutdown.
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
